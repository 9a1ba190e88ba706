//! Line-driven interactive session.
//!
//! `press` and `release` stand in for pointer down and up so the hold gesture
//! works from a terminal. Ctrl-C takes the page-unload path, `quit` and end of
//! input take the teardown path.

use std::io::Write;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{
    gesture::{HoldDetector, HoldState, Release},
    remote::ChecklistRemote,
    settings::Settings,
    sync::{
        EditTarget, FlushReport, FlushSummary, SwitchOutcome, SyncController, SyncError,
        UnloadDecision, notice_for,
    },
    types::{ChecklistId, ItemId},
};

use super::{
    CliResult, render_checklist_table, render_item_table, resolve_checklist, resolve_item,
    runtime_error,
};

const HELP: &str = "\
commands:
  lists                 show every checklist
  open <list>           switch to a checklist (saves the current one first)
  show                  show the open checklist
  tap <item>            advance an item's status
  press <item>          start holding an item
  press list <list>     start holding a checklist
  release               let go: a short press taps, a long one opens the editor
  leave                 pointer left the control; cancels a pending hold
  rename <name>         rename what the editor is open for
  delete                delete what the editor is open for
  cancel                close the editor
  new <name>            create a checklist and open it
  add <name>            add an item to the open checklist
  save                  save unsaved changes now
  status                show sync status
  quit                  leave the shell";

#[derive(Debug, Clone, Eq, PartialEq)]
enum PressTarget {
    Item(String),
    Checklist(String),
}

#[derive(Debug, Clone, Eq, PartialEq)]
enum ShellCommand {
    Lists,
    Open(String),
    Show,
    Tap(String),
    Press(PressTarget),
    Release,
    Leave,
    Rename(String),
    Delete,
    Cancel,
    New(String),
    Add(String),
    Save,
    Status,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Result<Option<ShellCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };
    let argument = |usage: &str| {
        if rest.is_empty() {
            Err(format!("usage: {usage}"))
        } else {
            Ok(rest.to_string())
        }
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "lists" | "ls" => ShellCommand::Lists,
        "open" => ShellCommand::Open(argument("open <list>")?),
        "show" => ShellCommand::Show,
        "tap" => ShellCommand::Tap(argument("tap <item>")?),
        "press" => match rest.split_once(char::is_whitespace) {
            Some(("list", list)) if !list.trim().is_empty() => {
                ShellCommand::Press(PressTarget::Checklist(list.trim().to_string()))
            }
            _ => ShellCommand::Press(PressTarget::Item(argument("press <item> | press list <list>")?)),
        },
        "release" => ShellCommand::Release,
        "leave" => ShellCommand::Leave,
        "rename" => ShellCommand::Rename(argument("rename <name>")?),
        "delete" => ShellCommand::Delete,
        "cancel" => ShellCommand::Cancel,
        "new" => ShellCommand::New(argument("new <name>")?),
        "add" => ShellCommand::Add(argument("add <name>")?),
        "save" => ShellCommand::Save,
        "status" => ShellCommand::Status,
        "help" | "?" => ShellCommand::Help,
        "quit" | "exit" => ShellCommand::Quit,
        other => return Err(format!("unknown command '{other}'; type 'help'")),
    };
    Ok(Some(command))
}

pub(super) async fn run_shell<R: ChecklistRemote>(
    mut controller: SyncController<R>,
    settings: &Settings,
) -> CliResult<()> {
    if let Err(err) = controller.mount().await {
        report_error(&err);
    }
    println!(
        "{}",
        render_checklist_table(controller.store().current().checklists(), None, false)
    );
    println!("type 'help' for commands");

    let (mut detector, mut held) = HoldDetector::<EditTarget>::new(settings.hold_duration());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(err) => return Err(runtime_error(err)),
                };
                match parse_command(&line) {
                    Ok(Some(ShellCommand::Quit)) => break,
                    Ok(Some(command)) => handle(&mut controller, &mut detector, command).await,
                    Ok(None) => {}
                    Err(message) => println!("{message}"),
                }
                prompt();
            }
            Some(target) = held.recv() => {
                println!();
                println!(
                    "editing {}: rename <name>, delete, or cancel",
                    describe_target(&controller, &target)
                );
                prompt();
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!(error = %err, "failed to listen for ctrl-c");
                }
                println!();
                if let UnloadDecision::Defer(handle) = controller.on_unload() {
                    wait_for_flush(handle, settings.unload_grace()).await;
                }
                return Ok(());
            }
        }
    }

    drop(detector);
    if let Some(handle) = controller.teardown() {
        // The controller does not wait; the process still has to, or exiting
        // drops the runtime before the requests go out.
        wait_for_flush(handle, settings.unload_grace()).await;
    }
    Ok(())
}

async fn handle<R: ChecklistRemote>(
    controller: &mut SyncController<R>,
    detector: &mut HoldDetector<EditTarget>,
    command: ShellCommand,
) {
    match command {
        ShellCommand::Lists => print_lists(controller),
        ShellCommand::Open(selector) => match resolve_checklist(controller.store().current(), &selector) {
            Ok(id) => open(controller, &id).await,
            Err(err) => println!("{}", err.message),
        },
        ShellCommand::Show => print_active(controller),
        ShellCommand::Tap(selector) => match active_item(controller, &selector) {
            Ok(item_id) => {
                detector.press(EditTarget::Item(item_id));
                if let Release::Tap(target) = detector.release() {
                    activate(controller, target).await;
                }
            }
            Err(message) => println!("{message}"),
        },
        ShellCommand::Press(target) => {
            let target = match target {
                PressTarget::Item(selector) => active_item(controller, &selector).map(EditTarget::Item),
                PressTarget::Checklist(selector) => {
                    resolve_checklist(controller.store().current(), &selector)
                        .map(EditTarget::Checklist)
                        .map_err(|err| err.message)
                }
            };
            match target {
                Ok(target) => {
                    let label = describe_target(controller, &target);
                    if detector.press(target) {
                        println!(
                            "holding {label}; release to tap, or keep holding {} ms to edit",
                            detector.hold_duration().as_millis()
                        );
                    } else {
                        println!("an editor is open; rename, delete or cancel first");
                    }
                }
                Err(message) => println!("{message}"),
            }
        }
        ShellCommand::Release => match detector.release() {
            Release::Tap(target) => activate(controller, target).await,
            Release::Suppressed => {}
            Release::Ignored => println!("nothing is pressed"),
        },
        ShellCommand::Leave => {
            if detector.leave() {
                println!("hold cancelled");
            }
        }
        ShellCommand::Rename(name) => match detector.state() {
            HoldState::Held(target) => {
                let result = match &target {
                    EditTarget::Item(item_id) => controller.rename_item(item_id, &name).await,
                    EditTarget::Checklist(id) => controller.rename_checklist(id, &name).await,
                };
                match result {
                    Ok(()) => {
                        detector.close_modal();
                        println!("renamed to {}", name.trim());
                    }
                    Err(err) => report_error(&err),
                }
            }
            _ => println!("press and hold an item or list first"),
        },
        ShellCommand::Delete => match detector.state() {
            HoldState::Held(target) => {
                let label = describe_target(controller, &target);
                let result = match &target {
                    EditTarget::Item(item_id) => controller.delete_item(item_id).await,
                    EditTarget::Checklist(id) => controller.delete_checklist(id).await,
                };
                match result {
                    Ok(()) => {
                        detector.close_modal();
                        println!("deleted {label}");
                    }
                    Err(err) => report_error(&err),
                }
            }
            _ => println!("press and hold an item or list first"),
        },
        ShellCommand::Cancel => {
            if detector.close_modal().is_none() {
                println!("no editor is open");
            }
        }
        ShellCommand::New(name) => match controller.create_checklist(&name).await {
            Ok(outcome) => {
                report_flush(&outcome.flush);
                println!("created {}", name.trim());
                print_active(controller);
            }
            Err(err) => report_error(&err),
        },
        ShellCommand::Add(name) => match controller.add_item(&name).await {
            Ok(item_id) => {
                info!(%item_id, "item added from shell");
                print_active(controller);
            }
            Err(err) => report_error(&err),
        },
        ShellCommand::Save => match controller.save().await {
            Ok(Some(report)) => println!("saved {} items", report.attempted()),
            Ok(None) => println!("nothing to save"),
            Err(err) => report_error(&err),
        },
        ShellCommand::Status => {
            let status = controller.status();
            println!(
                "dirty: {}  switching: {}  flushing: {}  last error: {}",
                status.dirty,
                status.switching,
                status.flushing,
                status.last_error.as_deref().unwrap_or("-")
            );
        }
        ShellCommand::Help => println!("{HELP}"),
        ShellCommand::Quit => {}
    }
}

/// The ordinary tap action for a target: cycle an item, open a list.
async fn activate<R: ChecklistRemote>(controller: &mut SyncController<R>, target: EditTarget) {
    match target {
        EditTarget::Item(item_id) => match controller.tap_item(&item_id) {
            Ok(status) => {
                let name = item_name(controller, &item_id).unwrap_or(item_id.as_str());
                let marker = if controller.is_dirty() { " ●" } else { "" };
                println!("{name}: {status}{marker}");
            }
            Err(err) => report_error(&err),
        },
        EditTarget::Checklist(id) => open(controller, &id).await,
    }
}

async fn open<R: ChecklistRemote>(controller: &mut SyncController<R>, id: &ChecklistId) {
    match controller.switch_to(id).await {
        Ok(SwitchOutcome::AlreadyActive) => print_active(controller),
        Ok(SwitchOutcome::Switched { flush, .. }) => {
            report_flush(&flush);
            print_active(controller);
        }
        Err(err) => report_error(&err),
    }
}

fn active_item<R: ChecklistRemote>(
    controller: &SyncController<R>,
    selector: &str,
) -> Result<ItemId, String> {
    let checklist = controller
        .store()
        .active_checklist()
        .ok_or_else(|| "open a checklist first".to_string())?;
    resolve_item(checklist, selector).map_err(|err| err.message)
}

fn item_name<'a, R: ChecklistRemote>(
    controller: &'a SyncController<R>,
    item_id: &ItemId,
) -> Option<&'a str> {
    controller
        .store()
        .active_checklist()
        .and_then(|checklist| checklist.item(item_id))
        .map(|item| item.name.as_str())
}

fn describe_target<R: ChecklistRemote>(controller: &SyncController<R>, target: &EditTarget) -> String {
    match target {
        EditTarget::Item(item_id) => format!(
            "item '{}'",
            item_name(controller, item_id).unwrap_or(item_id.as_str())
        ),
        EditTarget::Checklist(id) => format!(
            "list '{}'",
            controller
                .store()
                .current()
                .get(id)
                .map(|checklist| checklist.name.as_str())
                .unwrap_or(id.as_str())
        ),
    }
}

fn print_lists<R: ChecklistRemote>(controller: &SyncController<R>) {
    let store = controller.store();
    println!(
        "{}",
        render_checklist_table(store.current().checklists(), store.active_id(), store.is_dirty())
    );
}

fn print_active<R: ChecklistRemote>(controller: &SyncController<R>) {
    match controller.store().active_checklist() {
        Some(checklist) => println!("{}", render_item_table(checklist)),
        None => println!("No checklist open."),
    }
}

fn report_flush(flush: &FlushSummary) {
    if let FlushSummary::Failed(err) = flush {
        report_error(err);
    }
}

fn report_error(err: &SyncError) {
    let notice = notice_for(err);
    eprintln!("{}: {}", notice.title, notice.detail);
}

async fn wait_for_flush(handle: JoinHandle<FlushReport>, grace: Duration) {
    match tokio::time::timeout(grace, handle).await {
        Ok(Ok(report)) if report.is_success() => println!("saved {} items", report.attempted()),
        Ok(Ok(report)) => eprintln!(
            "Changes not saved: {} of {} item updates failed",
            report.failed.len(),
            report.attempted()
        ),
        Ok(Err(err)) => warn!(error = %err, "flush task ended abnormally"),
        Err(_) => eprintln!("closing before the save finished; changes may be lost"),
    }
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}
