//! Command-line definition

use std::path::PathBuf;

use clap::{value_parser, Arg, ArgAction, Command};

pub(crate) fn build() -> Command {
    Command::new("forge")
        .version(forge_core::VERSION)
        .about("Verified code mutation: generate, attack, decide, commit or roll back")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("root")
                .long("root")
                .global(true)
                .default_value(".")
                .value_parser(value_parser!(PathBuf))
                .help("Project root"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Configuration file (default: <root>/forge.toml)"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit events and logs as JSON lines"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::Count)
                .help("More logging (-v debug, -vv trace); FORGE_LOG overrides"),
        )
        .subcommand(
            Command::new("run")
                .about("Mutate one file for one task")
                .arg(
                    Arg::new("task")
                        .long("task")
                        .required(true)
                        .help("What the change must achieve"),
                )
                .arg(
                    Arg::new("file")
                        .long("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Target file, relative to the root"),
                )
                .arg(native_arg()),
        )
        .subcommand(
            Command::new("next")
                .about("Take the next open task from the backlog and run it")
                .arg(
                    Arg::new("scan")
                        .long("scan")
                        .action(ArgAction::SetTrue)
                        .help("Offer quality breaches before backlog items"),
                )
                .arg(native_arg()),
        )
        .subcommand(
            Command::new("guard")
                .about("Inspect or reset the stability guard")
                .subcommand_required(true)
                .subcommand(
                    Command::new("status")
                        .about("Show per-file edit history")
                        .arg(
                            Arg::new("file")
                                .value_parser(value_parser!(PathBuf))
                                .help("Only this file"),
                        ),
                )
                .subcommand(
                    Command::new("unlock")
                        .about("Clear a lock and the file's history")
                        .arg(
                            Arg::new("file")
                                .required(true)
                                .value_parser(value_parser!(PathBuf)),
                        ),
                ),
        )
        .subcommand(
            Command::new("sprt")
                .about("Evaluate a trial array (0 = pass, 1 = fail) with the sequential test")
                .arg(
                    Arg::new("observations")
                        .required(true)
                        .help("JSON array, or @path to a file holding one"),
                )
                .arg(rate_arg("alpha", "Type I error rate"))
                .arg(rate_arg("beta", "Type II error rate"))
                .arg(rate_arg("p0", "Failure rate of acceptable code"))
                .arg(rate_arg("p1", "Failure rate of broken code")),
        )
}

fn native_arg() -> Arg {
    Arg::new("native")
        .long("native")
        .action(ArgAction::SetTrue)
        .help("Skip the container runtime and run tests as plain subprocesses")
}

fn rate_arg(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .value_parser(value_parser!(f64))
        .help(help)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_is_consistent() {
        build().debug_assert();
    }

    #[test]
    fn run_requires_task_and_file() {
        assert!(build().try_get_matches_from(["forge", "run", "--task", "x"]).is_err());
        let matches = build()
            .try_get_matches_from(["forge", "--json", "run", "--task", "x", "--file", "a.py"])
            .unwrap();
        assert!(matches.get_flag("json"));
        let (name, run) = matches.subcommand().unwrap();
        assert_eq!(name, "run");
        assert_eq!(run.get_one::<PathBuf>("file").unwrap(), &PathBuf::from("a.py"));
        assert!(!run.get_flag("native"));
    }

    #[test]
    fn global_flags_after_subcommand() {
        let matches = build()
            .try_get_matches_from(["forge", "guard", "status", "--root", "/tmp", "-vv"])
            .unwrap();
        assert_eq!(matches.get_one::<PathBuf>("root").unwrap(), &PathBuf::from("/tmp"));
        assert_eq!(matches.get_count("verbose"), 2);
    }

    #[test]
    fn sprt_rates_parse() {
        let matches = build()
            .try_get_matches_from(["forge", "sprt", "[0,0]", "--alpha", "0.01"])
            .unwrap();
        let (_, sprt) = matches.subcommand().unwrap();
        assert_eq!(sprt.get_one::<f64>("alpha"), Some(&0.01));
        assert!(sprt.get_one::<f64>("beta").is_none());
    }
}
