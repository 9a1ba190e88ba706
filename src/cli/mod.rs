use std::sync::Arc;

use clap::{Args, Subcommand};
use serde_json::{Value, json};
use tracing::{error, warn};

use crate::{
    cache::LocalCache,
    progress::{aggregate_progress, checklist_progress, display_order},
    remote::{ChecklistRemote, HttpRemote, RemoteError},
    settings::Settings,
    store::{ChecklistStore, Collection, StoreError},
    sync::{FlushSummary, Session, SyncController, SyncError, notice_for},
    types::{Checklist, ChecklistId, Credential, ItemId},
};

mod shell;

const SCHEMA_VERSION: &str = "cli.v1";

#[derive(Debug, Clone, Subcommand)]
pub enum RootCommand {
    /// List every checklist with its packing progress.
    Lists,
    /// Show the items of one checklist.
    Show(ListArgs),
    CreateList(NameArgs),
    RenameList(RenameListArgs),
    DeleteList(ListArgs),
    AddItem(AddItemArgs),
    RenameItem(RenameItemArgs),
    DeleteItem(ItemArgs),
    /// Advance an item's status and save.
    Tap(TapArgs),
    /// Packed percentage across all checklists.
    Progress,
    /// Interactive session with press-and-hold editing.
    Shell,
}

impl RootCommand {
    fn name(&self) -> &'static str {
        match self {
            RootCommand::Lists => "lists",
            RootCommand::Show(_) => "show",
            RootCommand::CreateList(_) => "create-list",
            RootCommand::RenameList(_) => "rename-list",
            RootCommand::DeleteList(_) => "delete-list",
            RootCommand::AddItem(_) => "add-item",
            RootCommand::RenameItem(_) => "rename-item",
            RootCommand::DeleteItem(_) => "delete-item",
            RootCommand::Tap(_) => "tap",
            RootCommand::Progress => "progress",
            RootCommand::Shell => "shell",
        }
    }

    /// Read-only commands fall back to the cached copy when the service is
    /// unreachable.
    fn is_read_only(&self) -> bool {
        matches!(
            self,
            RootCommand::Lists | RootCommand::Show(_) | RootCommand::Progress
        )
    }
}

#[derive(Debug, Clone, Args)]
pub struct ListArgs {
    /// Checklist id or name.
    #[arg(value_name = "LIST")]
    pub list: String,
}

#[derive(Debug, Clone, Args)]
pub struct NameArgs {
    #[arg(value_name = "NAME")]
    pub name: String,
}

#[derive(Debug, Clone, Args)]
pub struct RenameListArgs {
    #[arg(value_name = "LIST")]
    pub list: String,

    #[arg(value_name = "NAME")]
    pub name: String,
}

#[derive(Debug, Clone, Args)]
pub struct AddItemArgs {
    #[arg(value_name = "LIST")]
    pub list: String,

    #[arg(value_name = "NAME")]
    pub name: String,
}

#[derive(Debug, Clone, Args)]
pub struct RenameItemArgs {
    #[arg(value_name = "LIST")]
    pub list: String,

    /// Item id or name.
    #[arg(value_name = "ITEM")]
    pub item: String,

    #[arg(value_name = "NAME")]
    pub name: String,
}

#[derive(Debug, Clone, Args)]
pub struct ItemArgs {
    #[arg(value_name = "LIST")]
    pub list: String,

    #[arg(value_name = "ITEM")]
    pub item: String,
}

#[derive(Debug, Clone, Args)]
pub struct TapArgs {
    #[arg(value_name = "LIST")]
    pub list: String,

    #[arg(value_name = "ITEM")]
    pub item: String,

    #[arg(long, default_value_t = 1, value_name = "N")]
    pub times: u8,
}

/// Everything a command needs from the process environment.
pub struct CliContext {
    pub settings: Settings,
    pub credential: Option<Credential>,
}

pub async fn run(context: CliContext, command: RootCommand, json_output: bool, quiet: bool) -> i32 {
    let result = match build_controller(&context) {
        Ok(controller) => match command {
            RootCommand::Shell => shell::run_shell(controller, &context.settings)
                .await
                .map(|()| None),
            command => execute(controller, &context.settings, command)
                .await
                .map(Some),
        },
        Err(err) => Err(err),
    };

    match result {
        Ok(Some(output)) => {
            print_success(output, json_output, quiet);
            0
        }
        Ok(None) => 0,
        Err(err) => {
            print_error(&err, json_output);
            err.exit_code
        }
    }
}

struct CommandOutput {
    command: &'static str,
    api: String,
    data: Value,
    text: String,
}

#[derive(Debug)]
struct CliError {
    exit_code: i32,
    code: &'static str,
    message: String,
    details: Option<Value>,
}

type CliResult<T> = Result<T, CliError>;

fn build_controller(context: &CliContext) -> CliResult<SyncController<HttpRemote>> {
    let remote = HttpRemote::new(context.settings.remote_config()).map_err(runtime_error)?;
    let cache = context
        .settings
        .cache_enabled
        .then(LocalCache::in_data_dir);
    let session = Session::new(context.credential.clone(), ChecklistStore::default());
    Ok(SyncController::new(session, Arc::new(remote), cache))
}

async fn execute<R: ChecklistRemote>(
    mut controller: SyncController<R>,
    settings: &Settings,
    command: RootCommand,
) -> CliResult<CommandOutput> {
    let stale = match controller.mount().await {
        Ok(()) => controller.session().credential().is_none(),
        Err(err) if command.is_read_only() => {
            warn!(error = %err, command = command.name(), "showing cached checklists");
            true
        }
        Err(err) => return Err(sync_error(err)),
    };

    let command_name = command.name();
    let (data, text) = match command {
        RootCommand::Lists => lists(&controller, stale),
        RootCommand::Show(args) => show(&controller, &args.list, stale)?,
        RootCommand::Progress => progress(&controller, stale),
        RootCommand::CreateList(args) => create_list(&mut controller, &args.name).await?,
        RootCommand::RenameList(args) => {
            let id = resolve_checklist(controller.store().current(), &args.list)?;
            controller
                .rename_checklist(&id, &args.name)
                .await
                .map_err(sync_error)?;
            (
                json!({ "id": id, "name": args.name.trim() }),
                format!("Renamed checklist {id}."),
            )
        }
        RootCommand::DeleteList(args) => {
            let id = resolve_checklist(controller.store().current(), &args.list)?;
            controller.delete_checklist(&id).await.map_err(sync_error)?;
            (json!({ "id": id }), format!("Deleted checklist {id}."))
        }
        RootCommand::AddItem(args) => {
            open_checklist(&mut controller, &args.list).await?;
            let item_id = controller.add_item(&args.name).await.map_err(sync_error)?;
            (
                json!({ "id": item_id, "name": args.name.trim() }),
                format!("Added item {item_id}."),
            )
        }
        RootCommand::RenameItem(args) => {
            let item_id = open_item(&mut controller, &args.list, &args.item).await?;
            controller
                .rename_item(&item_id, &args.name)
                .await
                .map_err(sync_error)?;
            (
                json!({ "id": item_id, "name": args.name.trim() }),
                format!("Renamed item {item_id}."),
            )
        }
        RootCommand::DeleteItem(args) => {
            let item_id = open_item(&mut controller, &args.list, &args.item).await?;
            controller.delete_item(&item_id).await.map_err(sync_error)?;
            (json!({ "id": item_id }), format!("Deleted item {item_id}."))
        }
        RootCommand::Tap(args) => tap(&mut controller, args).await?,
        RootCommand::Shell => {
            return Err(usage_error(
                "SHELL_NOT_SUPPORTED",
                "shell must be started on its own",
            ));
        }
    };

    Ok(CommandOutput {
        command: command_name,
        api: settings.api_base_url.clone(),
        data,
        text,
    })
}

fn lists<R: ChecklistRemote>(controller: &SyncController<R>, stale: bool) -> (Value, String) {
    let store = controller.store();
    let checklists = store.current().checklists();
    let data = json!({
        "checklists": checklists.iter().map(checklist_summary_json).collect::<Vec<_>>(),
        "progress": aggregate_progress(checklists),
        "stale": stale,
    });
    let text = render_checklist_table(checklists, store.active_id(), store.is_dirty());
    (data, text)
}

fn show<R: ChecklistRemote>(
    controller: &SyncController<R>,
    selector: &str,
    stale: bool,
) -> CliResult<(Value, String)> {
    let collection = controller.store().current();
    let id = resolve_checklist(collection, selector)?;
    let checklist = collection
        .get(&id)
        .ok_or_else(|| checklist_not_found(selector))?;
    let mut data = checklist_json(checklist);
    data["stale"] = json!(stale);
    Ok((data, render_item_table(checklist)))
}

fn progress<R: ChecklistRemote>(controller: &SyncController<R>, stale: bool) -> (Value, String) {
    let checklists = controller.store().current().checklists();
    let overall = aggregate_progress(checklists);
    let data = json!({
        "progress": overall,
        "checklists": checklists
            .iter()
            .map(|checklist| json!({ "id": checklist.id, "progress": checklist_progress(checklist) }))
            .collect::<Vec<_>>(),
        "stale": stale,
    });
    (data, format!("{overall}% packed"))
}

async fn create_list<R: ChecklistRemote>(
    controller: &mut SyncController<R>,
    name: &str,
) -> CliResult<(Value, String)> {
    let outcome = controller
        .create_checklist(name)
        .await
        .map_err(sync_error)?;
    if let FlushSummary::Failed(err) = &outcome.flush {
        warn!(error = %err, "previous checklist was not saved before create");
    }
    Ok((
        json!({ "id": outcome.id, "name": name.trim() }),
        format!("Created checklist {}.", outcome.id),
    ))
}

async fn tap<R: ChecklistRemote>(
    controller: &mut SyncController<R>,
    args: TapArgs,
) -> CliResult<(Value, String)> {
    let item_id = open_item(controller, &args.list, &args.item).await?;
    let mut status = None;
    for _ in 0..args.times.max(1) {
        status = Some(controller.tap_item(&item_id).map_err(sync_error)?);
    }
    let report = controller.save().await.map_err(sync_error)?;
    let status = status
        .map(|status| status.as_str())
        .unwrap_or_default();
    Ok((
        json!({
            "id": item_id,
            "status": status,
            "saved": report.is_some(),
            "flush_id": report.as_ref().map(|report| report.flush_id),
        }),
        format!("{item_id} is now {status}."),
    ))
}

async fn open_checklist<R: ChecklistRemote>(
    controller: &mut SyncController<R>,
    selector: &str,
) -> CliResult<ChecklistId> {
    let id = resolve_checklist(controller.store().current(), selector)?;
    controller.switch_to(&id).await.map_err(sync_error)?;
    Ok(id)
}

async fn open_item<R: ChecklistRemote>(
    controller: &mut SyncController<R>,
    list: &str,
    item: &str,
) -> CliResult<ItemId> {
    let id = open_checklist(controller, list).await?;
    let checklist = controller
        .store()
        .current()
        .get(&id)
        .ok_or_else(|| checklist_not_found(list))?;
    resolve_item(checklist, item)
}

/// Matches an exact id first, then a case-insensitive name.
fn resolve_checklist(collection: &Collection, selector: &str) -> CliResult<ChecklistId> {
    let selector = selector.trim();
    if let Some(checklist) = collection
        .checklists()
        .iter()
        .find(|checklist| checklist.id.as_str() == selector)
    {
        return Ok(checklist.id.clone());
    }

    let matches = collection
        .checklists()
        .iter()
        .filter(|checklist| checklist.name.eq_ignore_ascii_case(selector))
        .collect::<Vec<_>>();
    match matches.as_slice() {
        [] => Err(checklist_not_found(selector)),
        [checklist] => Ok(checklist.id.clone()),
        _ => Err(ambiguous_error(
            "checklist",
            selector,
            matches.iter().map(|checklist| checklist.id.as_str()),
        )),
    }
}

fn resolve_item(checklist: &Checklist, selector: &str) -> CliResult<ItemId> {
    let selector = selector.trim();
    if let Some(item) = checklist
        .items
        .iter()
        .find(|item| item.id.as_str() == selector)
    {
        return Ok(item.id.clone());
    }

    let matches = checklist
        .items
        .iter()
        .filter(|item| item.name.eq_ignore_ascii_case(selector))
        .collect::<Vec<_>>();
    match matches.as_slice() {
        [] => Err(not_found_error(
            "ITEM_NOT_FOUND",
            format!("item '{selector}' not found in '{}'", checklist.name),
        )),
        [item] => Ok(item.id.clone()),
        _ => Err(ambiguous_error(
            "item",
            selector,
            matches.iter().map(|item| item.id.as_str()),
        )),
    }
}

fn checklist_summary_json(checklist: &Checklist) -> Value {
    json!({
        "id": checklist.id,
        "name": checklist.name,
        "packed": checklist.packed_count(),
        "total": checklist.items.len(),
        "progress": checklist_progress(checklist),
    })
}

fn checklist_json(checklist: &Checklist) -> Value {
    let mut value = checklist_summary_json(checklist);
    value["items"] = json!(display_order(&checklist.items));
    value
}

fn render_checklist_table(
    checklists: &[Checklist],
    active: Option<&ChecklistId>,
    dirty: bool,
) -> String {
    if checklists.is_empty() {
        return "No checklists found.".to_string();
    }

    let headers = ["", "ID", "Name", "Packed", "Progress"];
    let rows = checklists
        .iter()
        .map(|checklist| {
            let marker = match active {
                Some(id) if *id == checklist.id && dirty => "●",
                Some(id) if *id == checklist.id => ">",
                _ => "",
            };
            vec![
                marker.to_string(),
                checklist.id.to_string(),
                checklist.name.replace('\n', " "),
                format!("{}/{}", checklist.packed_count(), checklist.items.len()),
                format!("{}%", checklist_progress(checklist)),
            ]
        })
        .collect::<Vec<_>>();

    render_text_table(&headers, &rows)
}

fn render_item_table(checklist: &Checklist) -> String {
    let title = format!(
        "{} ({}% packed)",
        checklist.name,
        checklist_progress(checklist)
    );
    if checklist.items.is_empty() {
        return format!("{title}\nNo items yet.");
    }

    let headers = ["ID", "Item", "Status"];
    let rows = display_order(&checklist.items)
        .into_iter()
        .map(|item| {
            vec![
                item.id.to_string(),
                item.name.replace('\n', " "),
                item.status.to_string(),
            ]
        })
        .collect::<Vec<_>>();

    format!("{title}\n{}", render_text_table(&headers, &rows))
}

fn render_text_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths = headers
        .iter()
        .map(|header| header.chars().count())
        .collect::<Vec<_>>();

    for row in rows {
        for (index, cell) in row.iter().enumerate() {
            widths[index] = widths[index].max(cell.chars().count());
        }
    }

    let border = format!(
        "+{}+",
        widths
            .iter()
            .map(|width| "-".repeat(*width + 2))
            .collect::<Vec<_>>()
            .join("+")
    );
    let render_row = |cells: Vec<&str>| {
        format!(
            "| {} |",
            cells
                .iter()
                .enumerate()
                .map(|(index, cell)| {
                    let pad = widths[index].saturating_sub(cell.chars().count());
                    format!("{cell}{}", " ".repeat(pad))
                })
                .collect::<Vec<_>>()
                .join(" | ")
        )
    };

    let mut lines = vec![border.clone(), render_row(headers.to_vec()), border.clone()];
    for row in rows {
        lines.push(render_row(row.iter().map(String::as_str).collect()));
    }
    lines.push(border);
    lines.join("\n")
}

fn sync_error(err: SyncError) -> CliError {
    let notice = notice_for(&err);
    let exit_code = match &err {
        SyncError::NotAuthenticated | SyncError::Remote(RemoteError::Unauthorized) => 4,
        SyncError::Store(store) if store.is_invalid_reference() => 3,
        SyncError::Store(StoreError::NoActiveChecklist) | SyncError::EmptyName => 2,
        _ => 5,
    };
    let report = match &err {
        SyncError::FlushFailure(report) => serde_json::to_value(report).ok(),
        _ => None,
    };

    CliError {
        exit_code,
        code: err.code(),
        message: notice.detail,
        details: Some(json!({
            "title": notice.title,
            "retryable": notice.retryable,
            "flush": report,
        })),
    }
}

fn checklist_not_found(selector: &str) -> CliError {
    not_found_error(
        "CHECKLIST_NOT_FOUND",
        format!("checklist '{selector}' not found"),
    )
}

fn ambiguous_error<'a>(
    kind: &str,
    selector: &str,
    ids: impl Iterator<Item = &'a str>,
) -> CliError {
    let ids = ids.collect::<Vec<_>>();
    CliError {
        exit_code: 2,
        code: "AMBIGUOUS_SELECTOR",
        message: format!("{kind} name '{selector}' matches several entries; use an id"),
        details: Some(json!({ "ids": ids })),
    }
}

fn usage_error(code: &'static str, message: impl Into<String>) -> CliError {
    CliError {
        exit_code: 2,
        code,
        message: message.into(),
        details: None,
    }
}

fn not_found_error(code: &'static str, message: impl Into<String>) -> CliError {
    CliError {
        exit_code: 3,
        code,
        message: message.into(),
        details: None,
    }
}

fn runtime_error(err: impl std::fmt::Display) -> CliError {
    CliError {
        exit_code: 5,
        code: "RUNTIME_ERROR",
        message: err.to_string(),
        details: None,
    }
}

fn print_success(output: CommandOutput, json_output: bool, quiet: bool) {
    if json_output {
        let payload = json!({
            "schema_version": SCHEMA_VERSION,
            "command": output.command,
            "api": output.api,
            "data": output.data
        });
        match serde_json::to_string_pretty(&payload) {
            Ok(value) => println!("{value}"),
            Err(_) => println!("{}", payload),
        }
        return;
    }

    if quiet {
        return;
    }

    if output.text.is_empty() {
        println!("ok");
    } else {
        println!("{}", output.text);
    }
}

fn print_error(err: &CliError, json_output: bool) {
    error!(
        code = err.code,
        message = %err.message,
        details = ?err.details,
        "cli command failed"
    );

    if json_output {
        let payload = json!({
            "schema_version": SCHEMA_VERSION,
            "error": {
                "code": err.code,
                "message": err.message,
                "details": err.details
            }
        });
        match serde_json::to_string_pretty(&payload) {
            Ok(value) => eprintln!("{value}"),
            Err(_) => eprintln!("{}", payload),
        }
        return;
    }

    eprintln!("error[{}]: {}", err.code, err.message);
}
