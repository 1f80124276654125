//! Hand-rolled argv parsing. Usage errors exit 2; command errors are
//! reported by main.

use desloppify::commands::{ClusterAction, NextArgs, PlanSkipArgs, SynthesizeArgs};

pub(crate) fn print_help() {
    println!(
        "Usage:\n  desloppify help\n  desloppify version\n  desloppify scan [--path <subdir>] [--repo-root <path>] [--lang <lang>]\n  desloppify next [--tier 1..4] [--count N] [--scope <pattern>] [--status <status|all>] [--chronic] [--no-tier-fallback] [--explain] [--cluster <name>] [--include-skipped]\n  desloppify resolve <pattern>... --status fixed|wontfix|false_positive|open [--note <text>] [--attest <text>] [--confirm-batch-wontfix]\n  desloppify ignore <pattern> --attest <text> [--note <text>]\n  desloppify status\n  desloppify config list | get <key> | set <key> <value> | unset <key>\n  desloppify plan queue [--count N] [--include-skipped] [--cluster <name>]\n  desloppify plan move <top|bottom|before|after|up|down> <pattern>... [--target <id>] [--offset N]\n  desloppify plan skip <pattern>... [--permanent|--false-positive] [--reason <text>] [--note <text>] [--attest <text>] [--review-after N]\n  desloppify plan unskip <pattern>...\n  desloppify plan done <pattern>... [--note <text>] [--attest <text>|--confirm]\n  desloppify plan reopen <pattern>...\n  desloppify plan describe <pattern>... [--text <text>]\n  desloppify plan note <pattern>... [--text <text>]\n  desloppify plan focus [<cluster>] [--clear]\n  desloppify plan cluster create|delete|add|remove|move|update|show <name> [...]\n  desloppify plan synthesize [--stage observe|reflect|organize --report <text>] [--complete --strategy <text>] [--confirm-existing --note <text> --strategy <text>]\n  desloppify plan status\n  desloppify query-schema\n\nNotes:\n  - Every command writes its structured payload to .desloppify/query.json.\n  - Attestations must contain 'I have actually' and 'not gaming'.\n"
    );
}

#[derive(Debug, Clone)]
pub(crate) enum PlanCommand {
    Queue {
        count: Option<usize>,
        include_skipped: bool,
        cluster: Option<String>,
    },
    Move {
        position: String,
        patterns: Vec<String>,
        target: Option<String>,
        offset: Option<usize>,
    },
    Skip(PlanSkipArgs),
    Unskip {
        patterns: Vec<String>,
    },
    Done {
        patterns: Vec<String>,
        note: Option<String>,
        attest: Option<String>,
        confirm: bool,
    },
    Reopen {
        patterns: Vec<String>,
    },
    Describe {
        patterns: Vec<String>,
        text: Option<String>,
    },
    Note {
        patterns: Vec<String>,
        text: Option<String>,
    },
    Focus {
        cluster: Option<String>,
        clear: bool,
    },
    Cluster(ClusterAction),
    Synthesize(SynthesizeArgs),
    Status,
}

#[derive(Debug, Clone)]
pub(crate) enum Command {
    Scan {
        path: Option<String>,
    },
    Next(NextArgs),
    Resolve {
        patterns: Vec<String>,
        status: String,
        note: Option<String>,
        attest: Option<String>,
        confirm_batch_wontfix: bool,
    },
    Ignore {
        pattern: String,
        note: Option<String>,
        attest: Option<String>,
    },
    Status,
    Config {
        action: String,
        key: Option<String>,
        value: Option<String>,
    },
    Plan(PlanCommand),
    QuerySchema,
}

#[derive(Debug, Clone)]
pub(crate) struct Cli {
    pub repo_root: String,
    pub lang: Option<String>,
    pub command: Command,
}

fn take_value(args: &[String], i: usize, flag: &str) -> Result<String, String> {
    match args.get(i + 1) {
        Some(v) if !v.starts_with("--") => Ok(v.clone()),
        _ => Err(format!("{flag} requires a value")),
    }
}

fn parse_usize(flag: &str, raw: &str) -> Result<usize, String> {
    raw.parse::<usize>()
        .map_err(|_| format!("{flag} expects an integer, got: {raw}"))
}

/// Split common flags (--repo-root, --lang) out of the raw args, returning
/// (repo_root, lang, rest).
fn split_common_flags(args: &[String]) -> Result<(String, Option<String>, Vec<String>), String> {
    let mut repo_root: Option<String> = None;
    let mut lang: Option<String> = None;
    let mut rest = vec![];
    let mut i = 0usize;
    while i < args.len() {
        match args[i].as_str() {
            "--repo-root" => {
                repo_root = Some(take_value(args, i, "--repo-root")?);
                i += 2;
            }
            "--lang" => {
                lang = Some(take_value(args, i, "--lang")?);
                i += 2;
            }
            _ => {
                rest.push(args[i].clone());
                i += 1;
            }
        }
    }
    let repo_root = repo_root
        .or_else(|| std::env::var("DESLOPPIFY_REPO_ROOT").ok())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| ".".to_string());
    Ok((repo_root, lang, rest))
}

fn parse_scan(args: &[String]) -> Result<Command, String> {
    let mut path = None;
    let mut i = 0usize;
    while i < args.len() {
        match args[i].as_str() {
            "--path" => {
                path = Some(take_value(args, i, "--path")?);
                i += 2;
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(Command::Scan { path })
}

fn parse_next(args: &[String]) -> Result<Command, String> {
    let mut next = NextArgs::default();
    let mut i = 0usize;
    while i < args.len() {
        match args[i].as_str() {
            "--tier" => {
                let raw = take_value(args, i, "--tier")?;
                let tier = raw
                    .parse::<u8>()
                    .ok()
                    .filter(|t| (1..=4).contains(t))
                    .ok_or_else(|| format!("--tier expects 1..4, got: {raw}"))?;
                next.tier = Some(tier);
                i += 2;
            }
            "--count" => {
                next.count = Some(parse_usize("--count", &take_value(args, i, "--count")?)?);
                i += 2;
            }
            "--scope" => {
                next.scope = Some(take_value(args, i, "--scope")?);
                i += 2;
            }
            "--status" => {
                next.status = Some(take_value(args, i, "--status")?);
                i += 2;
            }
            "--cluster" => {
                next.cluster = Some(take_value(args, i, "--cluster")?);
                i += 2;
            }
            "--chronic" => {
                next.chronic = true;
                i += 1;
            }
            "--no-tier-fallback" => {
                next.no_tier_fallback = true;
                i += 1;
            }
            "--explain" => {
                next.explain = true;
                i += 1;
            }
            "--include-skipped" => {
                next.include_skipped = true;
                i += 1;
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(Command::Next(next))
}

fn parse_resolve(args: &[String]) -> Result<Command, String> {
    let mut patterns = vec![];
    let mut status: Option<String> = None;
    let mut note = None;
    let mut attest = None;
    let mut confirm_batch_wontfix = false;
    let mut i = 0usize;
    while i < args.len() {
        match args[i].as_str() {
            "--status" => {
                status = Some(take_value(args, i, "--status")?);
                i += 2;
            }
            "--note" => {
                note = Some(take_value(args, i, "--note")?);
                i += 2;
            }
            "--attest" => {
                attest = Some(take_value(args, i, "--attest")?);
                i += 2;
            }
            "--confirm-batch-wontfix" => {
                confirm_batch_wontfix = true;
                i += 1;
            }
            other if !other.starts_with("--") => {
                patterns.push(other.to_string());
                i += 1;
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    if patterns.is_empty() {
        return Err("resolve requires at least one pattern".to_string());
    }
    Ok(Command::Resolve {
        patterns,
        status: status.ok_or_else(|| "resolve requires --status".to_string())?,
        note,
        attest,
        confirm_batch_wontfix,
    })
}

fn parse_ignore(args: &[String]) -> Result<Command, String> {
    let mut pattern: Option<String> = None;
    let mut note = None;
    let mut attest = None;
    let mut i = 0usize;
    while i < args.len() {
        match args[i].as_str() {
            "--note" => {
                note = Some(take_value(args, i, "--note")?);
                i += 2;
            }
            "--attest" => {
                attest = Some(take_value(args, i, "--attest")?);
                i += 2;
            }
            other if !other.starts_with("--") && pattern.is_none() => {
                pattern = Some(other.to_string());
                i += 1;
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(Command::Ignore {
        pattern: pattern.ok_or_else(|| "ignore requires a pattern".to_string())?,
        note,
        attest,
    })
}

fn parse_config(args: &[String]) -> Result<Command, String> {
    let action = args
        .first()
        .cloned()
        .ok_or_else(|| "config requires a subcommand: list|get|set|unset".to_string())?;
    match action.as_str() {
        "list" => Ok(Command::Config {
            action,
            key: None,
            value: None,
        }),
        "get" | "unset" => Ok(Command::Config {
            action,
            key: Some(
                args.get(1)
                    .cloned()
                    .ok_or_else(|| "config get/unset requires a key".to_string())?,
            ),
            value: None,
        }),
        "set" => Ok(Command::Config {
            action,
            key: Some(
                args.get(1)
                    .cloned()
                    .ok_or_else(|| "config set requires a key".to_string())?,
            ),
            value: Some(
                args.get(2)
                    .cloned()
                    .ok_or_else(|| "config set requires a value".to_string())?,
            ),
        }),
        other => Err(format!("unknown config subcommand: {other}")),
    }
}

fn parse_patterns_with_flags(
    args: &[String],
    flags: &mut dyn FnMut(&str, &[String], usize) -> Result<Option<usize>, String>,
) -> Result<Vec<String>, String> {
    let mut patterns = vec![];
    let mut i = 0usize;
    while i < args.len() {
        let arg = args[i].as_str();
        if arg.starts_with("--") {
            match flags(arg, args, i)? {
                Some(consumed) => i += consumed,
                None => return Err(format!("unknown argument: {arg}")),
            }
        } else {
            patterns.push(arg.to_string());
            i += 1;
        }
    }
    Ok(patterns)
}

fn parse_plan_skip(args: &[String]) -> Result<PlanCommand, String> {
    let mut skip = PlanSkipArgs::default();
    let mut review_after: Option<u32> = None;
    let mut reason = None;
    let mut note = None;
    let mut attest = None;
    let mut permanent = false;
    let mut false_positive = false;

    let patterns = parse_patterns_with_flags(args, &mut |flag, args, i| match flag {
        "--permanent" => {
            permanent = true;
            Ok(Some(1))
        }
        "--false-positive" => {
            false_positive = true;
            Ok(Some(1))
        }
        "--reason" => {
            reason = Some(take_value(args, i, "--reason")?);
            Ok(Some(2))
        }
        "--note" => {
            note = Some(take_value(args, i, "--note")?);
            Ok(Some(2))
        }
        "--attest" => {
            attest = Some(take_value(args, i, "--attest")?);
            Ok(Some(2))
        }
        "--review-after" => {
            let raw = take_value(args, i, "--review-after")?;
            review_after = Some(
                raw.parse::<u32>()
                    .map_err(|_| format!("--review-after expects an integer, got: {raw}"))?,
            );
            Ok(Some(2))
        }
        _ => Ok(None),
    })?;
    if patterns.is_empty() {
        return Err("plan skip requires at least one pattern".to_string());
    }
    skip.patterns = patterns;
    skip.permanent = permanent;
    skip.false_positive = false_positive;
    skip.reason = reason;
    skip.note = note;
    skip.attest = attest;
    skip.review_after = review_after;
    Ok(PlanCommand::Skip(skip))
}

fn parse_plan_cluster(args: &[String]) -> Result<PlanCommand, String> {
    let action = args
        .first()
        .cloned()
        .ok_or_else(|| "plan cluster requires: create|delete|add|remove|move|update|show".to_string())?;
    let name = args
        .get(1)
        .cloned()
        .ok_or_else(|| format!("plan cluster {action} requires a cluster name"))?;
    let rest = &args[2..];

    let cluster_action = match action.as_str() {
        "create" => {
            let mut description = None;
            let mut cluster_action = None;
            let mut i = 0usize;
            while i < rest.len() {
                match rest[i].as_str() {
                    "--description" => {
                        description = Some(take_value(rest, i, "--description")?);
                        i += 2;
                    }
                    "--action" => {
                        cluster_action = Some(take_value(rest, i, "--action")?);
                        i += 2;
                    }
                    other => return Err(format!("unknown argument: {other}")),
                }
            }
            ClusterAction::Create {
                name,
                description,
                action: cluster_action,
            }
        }
        "delete" => ClusterAction::Delete { name },
        "show" => ClusterAction::Show { name },
        "add" | "remove" => {
            let patterns: Vec<String> = rest.to_vec();
            if patterns.is_empty() {
                return Err(format!("plan cluster {action} requires finding patterns"));
            }
            if patterns.iter().any(|p| p.starts_with("--")) {
                return Err(format!("plan cluster {action} takes only finding patterns"));
            }
            if action == "add" {
                ClusterAction::Add { name, patterns }
            } else {
                ClusterAction::Remove { name, patterns }
            }
        }
        "move" => {
            let position = rest
                .first()
                .cloned()
                .ok_or_else(|| "plan cluster move requires a position".to_string())?;
            let mut target = None;
            let mut offset = None;
            let mut i = 1usize;
            while i < rest.len() {
                match rest[i].as_str() {
                    "--target" => {
                        target = Some(take_value(rest, i, "--target")?);
                        i += 2;
                    }
                    "--offset" => {
                        offset = Some(parse_usize("--offset", &take_value(rest, i, "--offset")?)?);
                        i += 2;
                    }
                    other => return Err(format!("unknown argument: {other}")),
                }
            }
            ClusterAction::Move {
                name,
                position,
                target,
                offset,
            }
        }
        "update" => {
            let mut description = None;
            let mut cluster_action = None;
            let mut steps: Option<Vec<String>> = None;
            let mut i = 0usize;
            while i < rest.len() {
                match rest[i].as_str() {
                    "--description" => {
                        description = Some(take_value(rest, i, "--description")?);
                        i += 2;
                    }
                    "--action" => {
                        cluster_action = Some(take_value(rest, i, "--action")?);
                        i += 2;
                    }
                    "--steps" => {
                        // Greedy: everything up to the next flag.
                        let mut collected = vec![];
                        let mut j = i + 1;
                        while j < rest.len() && !rest[j].starts_with("--") {
                            collected.push(rest[j].clone());
                            j += 1;
                        }
                        if collected.is_empty() {
                            return Err("--steps requires at least one step".to_string());
                        }
                        i = j;
                        steps = Some(collected);
                    }
                    other => return Err(format!("unknown argument: {other}")),
                }
            }
            ClusterAction::Update {
                name,
                description,
                action: cluster_action,
                steps,
            }
        }
        other => return Err(format!("unknown plan cluster subcommand: {other}")),
    };
    Ok(PlanCommand::Cluster(cluster_action))
}

fn parse_plan_synthesize(args: &[String]) -> Result<PlanCommand, String> {
    let mut synth = SynthesizeArgs::default();
    let mut i = 0usize;
    while i < args.len() {
        match args[i].as_str() {
            "--stage" => {
                synth.stage = Some(take_value(args, i, "--stage")?);
                i += 2;
            }
            "--report" => {
                synth.report = Some(take_value(args, i, "--report")?);
                i += 2;
            }
            "--strategy" => {
                synth.strategy = Some(take_value(args, i, "--strategy")?);
                i += 2;
            }
            "--note" => {
                synth.note = Some(take_value(args, i, "--note")?);
                i += 2;
            }
            "--complete" => {
                synth.complete = true;
                i += 1;
            }
            "--confirm-existing" => {
                synth.confirm_existing = true;
                i += 1;
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(PlanCommand::Synthesize(synth))
}

fn parse_plan(args: &[String]) -> Result<Command, String> {
    let sub = args
        .first()
        .cloned()
        .ok_or_else(|| "plan requires a subcommand".to_string())?;
    let rest = &args[1..];

    let plan_command = match sub.as_str() {
        "queue" => {
            let mut count = None;
            let mut include_skipped = false;
            let mut cluster = None;
            let mut i = 0usize;
            while i < rest.len() {
                match rest[i].as_str() {
                    "--count" => {
                        count = Some(parse_usize("--count", &take_value(rest, i, "--count")?)?);
                        i += 2;
                    }
                    "--include-skipped" => {
                        include_skipped = true;
                        i += 1;
                    }
                    "--cluster" => {
                        cluster = Some(take_value(rest, i, "--cluster")?);
                        i += 2;
                    }
                    other => return Err(format!("unknown argument: {other}")),
                }
            }
            PlanCommand::Queue {
                count,
                include_skipped,
                cluster,
            }
        }
        "move" => {
            let position = rest
                .first()
                .cloned()
                .ok_or_else(|| "plan move requires a position".to_string())?;
            let mut target = None;
            let mut offset = None;
            let patterns = parse_patterns_with_flags(&rest[1..], &mut |flag, args, i| match flag {
                "--target" => {
                    target = Some(take_value(args, i, "--target")?);
                    Ok(Some(2))
                }
                "--offset" => {
                    offset = Some(parse_usize("--offset", &take_value(args, i, "--offset")?)?);
                    Ok(Some(2))
                }
                _ => Ok(None),
            })?;
            if patterns.is_empty() {
                return Err("plan move requires at least one pattern".to_string());
            }
            PlanCommand::Move {
                position,
                patterns,
                target,
                offset,
            }
        }
        "skip" => parse_plan_skip(rest)?,
        "unskip" => {
            let patterns: Vec<String> = rest.to_vec();
            if patterns.is_empty() || patterns.iter().any(|p| p.starts_with("--")) {
                return Err("plan unskip requires finding patterns".to_string());
            }
            PlanCommand::Unskip { patterns }
        }
        "done" => {
            let mut note = None;
            let mut attest = None;
            let mut confirm = false;
            let patterns = parse_patterns_with_flags(rest, &mut |flag, args, i| match flag {
                "--note" => {
                    note = Some(take_value(args, i, "--note")?);
                    Ok(Some(2))
                }
                "--attest" => {
                    attest = Some(take_value(args, i, "--attest")?);
                    Ok(Some(2))
                }
                "--confirm" => {
                    confirm = true;
                    Ok(Some(1))
                }
                _ => Ok(None),
            })?;
            if patterns.is_empty() {
                return Err("plan done requires at least one pattern".to_string());
            }
            PlanCommand::Done {
                patterns,
                note,
                attest,
                confirm,
            }
        }
        "reopen" => {
            let patterns: Vec<String> = rest.to_vec();
            if patterns.is_empty() || patterns.iter().any(|p| p.starts_with("--")) {
                return Err("plan reopen requires finding patterns".to_string());
            }
            PlanCommand::Reopen { patterns }
        }
        "describe" | "note" => {
            let mut text = None;
            let patterns = parse_patterns_with_flags(rest, &mut |flag, args, i| match flag {
                "--text" => {
                    text = Some(take_value(args, i, "--text")?);
                    Ok(Some(2))
                }
                _ => Ok(None),
            })?;
            if patterns.is_empty() {
                return Err(format!("plan {sub} requires at least one pattern"));
            }
            if sub == "describe" {
                PlanCommand::Describe { patterns, text }
            } else {
                PlanCommand::Note { patterns, text }
            }
        }
        "focus" => {
            let mut clear = false;
            let mut cluster = None;
            for arg in rest {
                match arg.as_str() {
                    "--clear" => clear = true,
                    other if !other.starts_with("--") && cluster.is_none() => {
                        cluster = Some(other.to_string());
                    }
                    other => return Err(format!("unknown argument: {other}")),
                }
            }
            PlanCommand::Focus { cluster, clear }
        }
        "cluster" => parse_plan_cluster(rest)?,
        "synthesize" => parse_plan_synthesize(rest)?,
        "status" => PlanCommand::Status,
        other => return Err(format!("unknown plan subcommand: {other}")),
    };
    Ok(Command::Plan(plan_command))
}

pub(crate) fn parse_cli(args: &[String]) -> Result<Cli, String> {
    let (repo_root, lang, rest) = split_common_flags(args)?;
    let command_name = rest
        .first()
        .cloned()
        .ok_or_else(|| "no command given; try `desloppify help`".to_string())?;
    let rest = &rest[1..];

    let command = match command_name.as_str() {
        "scan" => parse_scan(rest)?,
        "next" => parse_next(rest)?,
        "resolve" => parse_resolve(rest)?,
        "ignore" => parse_ignore(rest)?,
        "status" => Command::Status,
        "config" => parse_config(rest)?,
        "plan" => parse_plan(rest)?,
        "query-schema" => Command::QuerySchema,
        other => {
            return Err(format!(
                "unknown command `{other}`; use scan|next|resolve|ignore|status|config|plan|query-schema"
            ));
        }
    };

    Ok(Cli {
        repo_root,
        lang,
        command,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_scan_with_common_flags() {
        let cli = parse_cli(&args(&["scan", "--repo-root", "/tmp/x", "--lang", "python"]))
            .unwrap();
        assert_eq!(cli.repo_root, "/tmp/x");
        assert_eq!(cli.lang.as_deref(), Some("python"));
        assert!(matches!(cli.command, Command::Scan { path: None }));
    }

    #[test]
    fn parses_next_flags() {
        let cli = parse_cli(&args(&[
            "next",
            "--tier",
            "2",
            "--count",
            "5",
            "--explain",
            "--no-tier-fallback",
        ]))
        .unwrap();
        let Command::Next(next) = cli.command else {
            panic!("expected next");
        };
        assert_eq!(next.tier, Some(2));
        assert_eq!(next.count, Some(5));
        assert!(next.explain);
        assert!(next.no_tier_fallback);
    }

    #[test]
    fn rejects_bad_tier() {
        assert!(parse_cli(&args(&["next", "--tier", "9"])).is_err());
    }

    #[test]
    fn parses_resolve() {
        let cli = parse_cli(&args(&[
            "resolve",
            "unused::*",
            "--status",
            "fixed",
            "--attest",
            "I have actually fixed it and I am not gaming the score.",
        ]))
        .unwrap();
        let Command::Resolve {
            patterns, status, ..
        } = cli.command
        else {
            panic!("expected resolve");
        };
        assert_eq!(patterns, vec!["unused::*"]);
        assert_eq!(status, "fixed");
    }

    #[test]
    fn resolve_requires_status_and_pattern() {
        assert!(parse_cli(&args(&["resolve", "x"])).is_err());
        assert!(parse_cli(&args(&["resolve", "--status", "fixed"])).is_err());
    }

    #[test]
    fn parses_plan_skip_kinds() {
        let cli = parse_cli(&args(&[
            "plan",
            "skip",
            "unused::a.py::os",
            "--permanent",
            "--note",
            "documented",
            "--attest",
            "I have actually reviewed it and I am not gaming the score.",
        ]))
        .unwrap();
        let Command::Plan(PlanCommand::Skip(skip)) = cli.command else {
            panic!("expected plan skip");
        };
        assert!(skip.permanent);
        assert_eq!(skip.note.as_deref(), Some("documented"));
    }

    #[test]
    fn parses_cluster_update_steps_greedily() {
        let cli = parse_cli(&args(&[
            "plan",
            "cluster",
            "update",
            "fix-naming",
            "--steps",
            "step one",
            "step two",
            "--description",
            "d",
        ]))
        .unwrap();
        let Command::Plan(PlanCommand::Cluster(ClusterAction::Update {
            steps,
            description,
            ..
        })) = cli.command
        else {
            panic!("expected cluster update");
        };
        assert_eq!(steps.unwrap().len(), 2);
        assert_eq!(description.as_deref(), Some("d"));
    }

    #[test]
    fn parses_synthesize_stage() {
        let cli = parse_cli(&args(&[
            "plan",
            "synthesize",
            "--stage",
            "observe",
            "--report",
            "long enough report text",
        ]))
        .unwrap();
        let Command::Plan(PlanCommand::Synthesize(synth)) = cli.command else {
            panic!("expected synthesize");
        };
        assert_eq!(synth.stage.as_deref(), Some("observe"));
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(parse_cli(&args(&["frobnicate"])).is_err());
    }
}
