use desloppify::commands::{
    ResolveArgs, cmd_config_get, cmd_config_list, cmd_config_set, cmd_config_unset, cmd_ignore,
    cmd_next, cmd_plan_cluster, cmd_plan_describe, cmd_plan_done, cmd_plan_focus, cmd_plan_move,
    cmd_plan_note, cmd_plan_queue, cmd_plan_reopen, cmd_plan_skip, cmd_plan_status,
    cmd_plan_unskip, cmd_resolve, cmd_scan, cmd_status, cmd_synthesize,
};
use desloppify::errors::CommandError;
use desloppify::query::{QueryPayload, query_schema, write_query};
use desloppify::runtime::Runtime;
use std::path::Path;

mod cli;

use cli::{Cli, Command, PlanCommand};

fn print_version() {
    println!("{}", env!("CARGO_PKG_VERSION"));
}

fn run_command(cli: &Cli) -> Result<QueryPayload, CommandError> {
    let mut rt = Runtime::discover(Path::new(&cli.repo_root), cli.lang.as_deref());

    match &cli.command {
        Command::Scan { path } => cmd_scan(&mut rt, path.as_deref()),
        Command::Next(args) => cmd_next(&rt, args),
        Command::Resolve {
            patterns,
            status,
            note,
            attest,
            confirm_batch_wontfix,
        } => cmd_resolve(
            &rt,
            &ResolveArgs {
                patterns: patterns.clone(),
                status: status.clone(),
                note: note.clone(),
                attest: attest.clone(),
                confirm_batch_wontfix: *confirm_batch_wontfix,
            },
        ),
        Command::Ignore {
            pattern,
            note,
            attest,
        } => cmd_ignore(&mut rt, pattern, note.as_deref(), attest.as_deref()),
        Command::Status => cmd_status(&rt),
        Command::Config { action, key, value } => match action.as_str() {
            "list" => cmd_config_list(&rt),
            "get" => cmd_config_get(&rt, key.as_deref().unwrap_or_default()),
            "set" => cmd_config_set(
                &mut rt,
                key.as_deref().unwrap_or_default(),
                value.as_deref().unwrap_or_default(),
            ),
            _ => cmd_config_unset(&mut rt, key.as_deref().unwrap_or_default()),
        },
        Command::Plan(plan_command) => match plan_command {
            PlanCommand::Queue {
                count,
                include_skipped,
                cluster,
            } => cmd_plan_queue(&rt, *count, *include_skipped, cluster.clone()),
            PlanCommand::Move {
                position,
                patterns,
                target,
                offset,
            } => cmd_plan_move(&rt, patterns.clone(), position, target.clone(), *offset),
            PlanCommand::Skip(args) => cmd_plan_skip(&rt, args),
            PlanCommand::Unskip { patterns } => cmd_plan_unskip(&rt, patterns.clone()),
            PlanCommand::Done {
                patterns,
                note,
                attest,
                confirm,
            } => cmd_plan_done(&rt, patterns.clone(), note.clone(), attest.clone(), *confirm),
            PlanCommand::Reopen { patterns } => cmd_plan_reopen(&rt, patterns.clone()),
            PlanCommand::Describe { patterns, text } => {
                cmd_plan_describe(&rt, patterns.clone(), text.clone())
            }
            PlanCommand::Note { patterns, text } => {
                cmd_plan_note(&rt, patterns.clone(), text.clone())
            }
            PlanCommand::Focus { cluster, clear } => {
                cmd_plan_focus(&rt, cluster.clone(), *clear)
            }
            PlanCommand::Cluster(action) => cmd_plan_cluster(&rt, action.clone()),
            PlanCommand::Synthesize(args) => cmd_synthesize(&rt, args),
            PlanCommand::Status => cmd_plan_status(&rt),
        },
        Command::QuerySchema => unreachable!("handled before dispatch"),
    }
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("version" | "--version" | "-V") => {
            print_version();
            return;
        }
        Some("help" | "--help" | "-h") | None => {
            cli::print_help();
            return;
        }
        _ => {}
    }

    let cli = match cli::parse_cli(&args) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("desloppify: {e}");
            std::process::exit(2);
        }
    };

    // Schema output is plain stdout; it must not touch the repo.
    if matches!(cli.command, Command::QuerySchema) {
        match serde_json::to_string_pretty(&query_schema()) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("desloppify: failed to render schema: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    match run_command(&cli) {
        Ok(mut payload) => {
            let rt = Runtime::discover(Path::new(&cli.repo_root), cli.lang.as_deref());
            write_query(&mut payload, &rt.config, &rt.query_path());
            match serde_json::to_string_pretty(&payload) {
                Ok(json) => println!("{json}"),
                Err(e) => eprintln!("desloppify: failed to render payload: {e}"),
            }
        }
        Err(e) if e.is_fatal() => {
            eprintln!("desloppify: {e}");
            std::process::exit(1);
        }
        Err(e) => {
            // Validation and referential errors leave the stores untouched
            // and do not fail the process.
            eprintln!("desloppify: {e}");
        }
    }
}
