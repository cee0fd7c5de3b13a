//! `mol`: molecule workflow CLI.
//!
//! Every command has a text mode and a `--json` mode. JSON output is written
//! only once the whole command has succeeded; on failure a single error object
//! is printed instead.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;

use molecule::commands::{
    Commands, ListScope, ParseReport, ShowReport, SlingRequest, TemplateSummary, phase_flag,
};
use molecule::core::progress::NextAction;
use molecule::core::types::{Phase, Record};
use molecule::core::vars::parse_bindings;
use molecule::error::MolError;
use molecule::exit_codes;
use molecule::hook::DetachOutcome;
use molecule::io::init::{InitOptions, init_workspace};
use molecule::io::render::{render_progress, render_status};
use molecule::io::session::CommandSession;
use molecule::logging;
use molecule::phase::{
    BondOptions, BondOutcome, BurnOutcome, DistillOptions, EdgeKind, Instance, SquashOutcome,
};
use molecule::progress::InstanceSummary;

#[derive(Parser)]
#[command(
    name = "mol",
    version,
    about = "Workflow templates, instances and agent hooks over a shared ledger"
)]
struct Cli {
    /// Print structured JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    /// Workspace root (defaults to the current directory).
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.mol/` with config, an empty ledger and an empty project catalog.
    Init {
        /// Rewrite the config even if `.mol/` exists.
        #[arg(short, long)]
        force: bool,
    },
    /// List templates from every scope.
    List {
        /// Builtin and file scopes only.
        #[arg(long, conflicts_with = "db")]
        catalog: bool,
        /// Template records in the ledger only.
        #[arg(long)]
        db: bool,
    },
    /// Show a template with its parsed steps, or a record with its children.
    Show { id: String },
    /// Parse and validate a template's steps.
    Parse { id: String },
    /// Create one child per step of a template under an existing parent.
    Instantiate {
        template: String,
        parent: String,
        /// Variable binding.
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,
    },
    /// List instance roots created from a template.
    Instances { template: String },
    /// Progress of an instance.
    Progress { root_id: String },
    /// Attach an instance to an agent's hook.
    Attach {
        instance: String,
        #[arg(long)]
        agent: Option<String>,
        /// Replace whatever is attached.
        #[arg(short, long)]
        force: bool,
    },
    /// Clear an agent's hook.
    Detach {
        #[arg(long)]
        agent: Option<String>,
    },
    /// What an agent's hook holds.
    Attachment {
        #[arg(long)]
        agent: Option<String>,
    },
    /// Hook and progress for an agent, with the suggested next action.
    Status { agent: Option<String> },
    /// Templates only.
    Catalog,
    /// Discard the ephemeral instance on an agent's hook without a digest.
    Burn {
        #[arg(long)]
        agent: Option<String>,
        #[arg(long, default_value = "")]
        reason: String,
    },
    /// Condense the instance on an agent's hook into a digest.
    Squash {
        #[arg(long)]
        agent: Option<String>,
        #[arg(long, default_value = "")]
        summary: String,
    },
    /// Create a durable instance of a template.
    Pour {
        template: String,
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,
    },
    /// Create an ephemeral instance of a template.
    Wisp {
        template: String,
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,
    },
    /// Combine two templates or instances.
    Bond {
        left: String,
        right: String,
        /// Spawn the new instance as ephemeral.
        #[arg(long, conflicts_with = "durable")]
        wisp: bool,
        /// Spawn the new instance as durable.
        #[arg(long)]
        durable: bool,
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,
    },
    /// Turn an instance back into a project-scope template.
    Distill {
        root_id: String,
        name: String,
        #[arg(long)]
        title: Option<String>,
        /// Literal to replace with a `{{name}}` placeholder.
        #[arg(long = "var", value_name = "LITERAL=NAME")]
        vars: Vec<String>,
    },
    /// Write the builtin templates as JSONL.
    Export { path: PathBuf },
    /// Put a template or instance on an agent's hook and notify the agent.
    Sling {
        thing: String,
        agent: Option<String>,
        #[arg(long)]
        wisp: bool,
        #[arg(short, long)]
        force: bool,
        #[arg(long)]
        no_notify: bool,
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,
    },
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let json_mode = cli.json;
    if let Err(err) = run(cli) {
        let code = err
            .downcast_ref::<MolError>()
            .map_or(exit_codes::FAILED, exit_codes::for_error);
        if json_mode {
            println!(
                "{}",
                json!({ "error": format!("{err:#}"), "exit_code": code })
            );
        } else {
            eprintln!("{err:#}");
        }
        std::process::exit(code);
    }
}

fn run(cli: Cli) -> Result<()> {
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir().context("resolve current directory")?,
    };
    let json_mode = cli.json;
    let workspace = || Commands::open(&root);

    match cli.command {
        Command::Init { force } => {
            let paths = init_workspace(&root, &InitOptions { force })?;
            let report = json!({
                "root": paths.root,
                "config": paths.config_path,
                "ledger": paths.ledger_path,
                "catalog": paths.catalog_path,
            });
            emit(json_mode, &report, |_| {
                Ok(format!("initialized {}", paths.mol_dir.display()))
            })
        }
        Command::List { catalog, db } => {
            let scope = match (catalog, db) {
                (true, _) => ListScope::Catalog,
                (_, true) => ListScope::Db,
                _ => ListScope::All,
            };
            emit(json_mode, &workspace()?.list(scope)?, |t| Ok(template_lines(t)))
        }
        Command::Catalog => emit(json_mode, &workspace()?.catalog()?, |t| Ok(template_lines(t))),
        Command::Show { id } => emit(json_mode, &workspace()?.show(&id)?, |r| Ok(show_text(r))),
        Command::Parse { id } => emit(json_mode, &workspace()?.parse(&id)?, |r| Ok(parse_text(r))),
        Command::Instantiate {
            template,
            parent,
            vars,
        } => {
            let created = workspace()?.instantiate(&template, &parent, &bindings(&vars)?)?;
            emit(json_mode, &created, |c| Ok(record_lines(c)))
        }
        Command::Instances { template } => {
            emit(json_mode, &workspace()?.instances(&template)?, |i| Ok(instance_lines(i)))
        }
        Command::Progress { root_id } => {
            emit(json_mode, &workspace()?.progress(&root_id)?, render_progress)
        }
        Command::Attach {
            instance,
            agent,
            force,
        } => {
            let commands = workspace()?;
            let agent = commands.resolve_agent(agent.as_deref())?;
            let report = commands.attach(&agent, &instance, force)?;
            emit(json_mode, &report, |r| {
                Ok(match &r.replaced {
                    Some(previous) => format!(
                        "attached {} to {} (replaced {previous})",
                        r.instance_id, r.hook_id
                    ),
                    None => format!("attached {} to {}", r.instance_id, r.hook_id),
                })
            })
        }
        Command::Detach { agent } => {
            let commands = workspace()?;
            let agent = commands.resolve_agent(agent.as_deref())?;
            emit(json_mode, &commands.detach(&agent)?, |o| {
                Ok(match o {
                    DetachOutcome::Detached {
                        hook_id,
                        instance_id,
                    } => format!("detached {instance_id} from {hook_id}"),
                    DetachOutcome::AlreadyClear { agent } => {
                        format!("nothing attached for {agent}")
                    }
                })
            })
        }
        Command::Attachment { agent } => {
            let commands = workspace()?;
            let agent = commands.resolve_agent(agent.as_deref())?;
            emit(json_mode, &commands.attachment(&agent)?, |a| {
                Ok(match a {
                    Some(a) => format!("{} (since {})", a.instance_id, a.attached_at),
                    None => "nothing attached".to_string(),
                })
            })
        }
        Command::Status { agent } => {
            let report = workspace()?.status(agent.as_deref())?;
            emit(json_mode, &report, |r| {
                render_status(r, &NextAction::hint(&r.next_action))
            })
        }
        Command::Burn { agent, reason } => {
            emit(json_mode, &workspace()?.burn(agent.as_deref(), &reason)?, |o| {
                Ok(burn_text(o))
            })
        }
        Command::Squash { agent, summary } => {
            emit(json_mode, &workspace()?.squash(agent.as_deref(), &summary)?, |o| {
                Ok(squash_text(o))
            })
        }
        Command::Pour { template, vars } => {
            let instance = workspace()?.pour(&template, &bindings(&vars)?)?;
            emit(json_mode, &instance, |i| Ok(instance_text(i)))
        }
        Command::Wisp { template, vars } => {
            let instance = workspace()?.wisp(&template, &bindings(&vars)?)?;
            emit(json_mode, &instance, |i| Ok(instance_text(i)))
        }
        Command::Bond {
            left,
            right,
            wisp,
            durable,
            vars,
        } => {
            let options = BondOptions {
                force: phase_flag(wisp, durable),
                bindings: bindings(&vars)?,
            };
            emit(json_mode, &workspace()?.bond(&left, &right, &options)?, |o| {
                Ok(bond_text(o))
            })
        }
        Command::Distill {
            root_id,
            name,
            title,
            vars,
        } => {
            let options = DistillOptions {
                template_id: name,
                title,
                literals: bindings(&vars)?,
            };
            let template = workspace()?.distill(&root_id, &options)?;
            emit(json_mode, &template, |t| {
                Ok(format!("distilled {} into template {}", root_id, t.id))
            })
        }
        Command::Export { path } => {
            let count = workspace()?.export(&path)?;
            let report = json!({ "path": path, "templates": count });
            emit(json_mode, &report, |_| {
                Ok(format!("exported {count} templates to {}", path.display()))
            })
        }
        Command::Sling {
            thing,
            agent,
            wisp,
            force,
            no_notify,
            vars,
        } => {
            let request = SlingRequest {
                thing,
                agent,
                wisp,
                force,
                notify: !no_notify,
                bindings: bindings(&vars)?,
            };
            let commands = workspace()?;
            let session = CommandSession::new(commands.config().session.clone());
            emit(json_mode, &commands.sling(&request, &session)?, |r| {
                let verb = if r.spawned { "spawned and slung" } else { "slung" };
                Ok(format!("{verb} {} to {}", r.instance_id, r.agent))
            })
        }
    }
}

/// Print `value` as pretty JSON or through `text`, never both.
fn emit<T: Serialize>(json_mode: bool, value: &T, text: impl FnOnce(&T) -> Result<String>) -> Result<()> {
    let out = if json_mode {
        serde_json::to_string_pretty(value).context("serialize json output")?
    } else {
        text(value)?
    };
    println!("{out}");
    Ok(())
}

fn bindings(vars: &[String]) -> Result<BTreeMap<String, String>> {
    parse_bindings(vars).map_err(|err| anyhow!("invalid --var: {err}"))
}

fn template_lines(templates: &[TemplateSummary]) -> String {
    templates
        .iter()
        .map(|t| format!("{}\t{}\t{} steps\t{}", t.id, t.source, t.steps, t.title))
        .collect::<Vec<_>>()
        .join("\n")
}

fn record_lines(records: &[Record]) -> String {
    records
        .iter()
        .map(|r| format!("{}\t{}\t{}", r.id, r.status, r.title))
        .collect::<Vec<_>>()
        .join("\n")
}

fn instance_lines(instances: &[InstanceSummary]) -> String {
    if instances.is_empty() {
        return "no instances".to_string();
    }
    instances
        .iter()
        .map(|i| {
            let phase = i.phase.map_or("-", Phase::as_str);
            format!(
                "{}\t{phase}\t{}\t{}/{}\t{}",
                i.root_id, i.status, i.done_steps, i.total_steps, i.title
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn show_text(report: &ShowReport) -> String {
    match report {
        ShowReport::Template {
            template,
            steps,
            errors,
            instance_count,
        } => {
            let mut out = format!(
                "{} ({}): {}\ninstances: {instance_count}\n",
                template.id, template.source, template.title
            );
            for step in steps {
                out.push_str(&format!("  {}: {}", step.step_ref, step.title));
                if !step.needs.is_empty() {
                    out.push_str(&format!(" <- {}", step.needs.join(", ")));
                }
                out.push('\n');
            }
            for err in errors {
                out.push_str(&format!("error: {err}\n"));
            }
            out.trim_end().to_string()
        }
        ShowReport::Record { record, children } => {
            let mut out = format!(
                "{} [{} {}] {}\n",
                record.id, record.kind, record.status, record.title
            );
            if !record.description.is_empty() {
                out.push_str(&format!("\n{}\n", record.description));
            }
            if !children.is_empty() {
                out.push('\n');
                out.push_str(&record_lines(children));
            }
            out.trim_end().to_string()
        }
    }
}

fn parse_text(report: &ParseReport) -> String {
    let mut out = format!(
        "{}: {} ({} steps)",
        report.template_id,
        if report.valid { "valid" } else { "invalid" },
        report.steps.len()
    );
    for err in &report.errors {
        out.push_str(&format!("\nerror: {err}"));
    }
    out
}

fn instance_text(instance: &Instance) -> String {
    format!(
        "created {} instance {} with {} steps",
        instance.phase,
        instance.root.id,
        instance.children.len()
    )
}

fn bond_text(outcome: &BondOutcome) -> String {
    match outcome {
        BondOutcome::Compound { template } => {
            format!("saved compound template {}", template.id)
        }
        BondOutcome::Spawned { host_id, instance } => format!(
            "spawned {} instance {} under {host_id}",
            instance.phase, instance.root.id
        ),
        BondOutcome::Linked {
            edge,
            from,
            to,
            already_linked,
        } => {
            let kind = match edge {
                EdgeKind::Dependency => "dependency",
                EdgeKind::Reference => "reference",
            };
            let suffix = if *already_linked { ", already linked" } else { "" };
            format!("linked {from} -> {to} ({kind}{suffix})")
        }
    }
}

fn squash_text(outcome: &SquashOutcome) -> String {
    match outcome {
        SquashOutcome::Squashed {
            instance_id,
            digest_id,
            ..
        } => format!("squashed {instance_id} into digest {digest_id}"),
        SquashOutcome::AlreadySquashed {
            instance_id,
            digest_id,
            ..
        } => format!("{instance_id} already squashed into {digest_id}"),
        SquashOutcome::AlreadyBurned { instance_id, .. } => {
            format!("{instance_id} was burned; no digest written")
        }
        SquashOutcome::NothingAttached { agent } => format!("nothing attached for {agent}"),
    }
}

fn burn_text(outcome: &BurnOutcome) -> String {
    match outcome {
        BurnOutcome::Burned {
            instance_id,
            discarded,
            ..
        } => format!("burned {instance_id} ({discarded} steps discarded)"),
        BurnOutcome::AlreadyBurned { instance_id } => format!("{instance_id} already burned"),
        BurnOutcome::AlreadySquashed {
            instance_id,
            digest_id,
        } => format!("{instance_id} already squashed into {digest_id}"),
        BurnOutcome::NothingAttached { agent } => format!("nothing attached for {agent}"),
    }
}
