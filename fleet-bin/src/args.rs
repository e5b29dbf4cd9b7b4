//! Per-operation argument parsing: turns the tokens left over after
//! command-tree resolution into a typed [`Command`].

use fleet_core::common::{FleetError, Result};
use fleet_core::{Command, Op, RunTarget, Target};

pub fn parse(op: Op, args: &[&str]) -> Result<Command> {
    match op {
        Op::New => Ok(Command::New {
            tokens: at_least_one(args, "new <name|base*n>...")?,
        }),
        Op::Select => Ok(Command::Select {
            name: one(args, "select <name>")?,
        }),
        Op::SetImage => Ok(Command::SetImage {
            parent: one(args, "set image <parent>")?,
        }),
        Op::SetApt => parse_apt(args),
        Op::SetBasedir => Ok(Command::SetBasedir {
            path: one(args, "set basedir <dir>")?,
        }),
        Op::SetDeploy => Ok(Command::SetDeploy {
            files: at_least_one(args, "set deploy <path>...")?,
        }),
        Op::SetUndeploy => Ok(Command::SetUndeploy {
            files: at_least_one(args, "set undeploy <path>...")?,
        }),
        Op::SetEntry => Ok(Command::SetEntry {
            entry: one(args, "set entry <path>")?,
        }),
        Op::SetPort => {
            let raw = one(args, "set port <port>")?;
            let port = raw
                .parse()
                .map_err(|_| FleetError::FormatError(format!("'{raw}' is not a port number")))?;
            Ok(Command::SetPort { port })
        }
        Op::ListImage => none(args, Command::ListImage),
        Op::ListApt => none(args, Command::ListApt),
        Op::ListDeploy => none(args, Command::ListDeploy),
        Op::ListSelect => none(args, Command::ListSelect),
        Op::ListStatus => none(args, Command::ListStatus),
        Op::Build => Ok(Command::Build {
            names: args.iter().map(|s| s.to_string()).collect(),
        }),
        Op::Run => parse_run(args),
        Op::RmImage => parse_rm_image(args),
        Op::RmContainer => Ok(Command::RmContainer {
            targets: targets(args, "rm container <image>.<ranges>...")?,
        }),
        Op::StopContainer => Ok(Command::StopContainer {
            targets: targets(args, "stop container <image>.<ranges>...")?,
        }),
    }
}

fn one(args: &[&str], usage: &str) -> Result<String> {
    match args {
        [value] => Ok(value.to_string()),
        _ => Err(FleetError::FormatError(format!("usage: {usage}"))),
    }
}

fn at_least_one(args: &[&str], usage: &str) -> Result<Vec<String>> {
    if args.is_empty() {
        return Err(FleetError::FormatError(format!("usage: {usage}")));
    }
    Ok(args.iter().map(|s| s.to_string()).collect())
}

fn none(args: &[&str], command: Command) -> Result<Command> {
    if let Some(extra) = args.first() {
        return Err(FleetError::FormatError(format!(
            "unexpected argument '{extra}'"
        )));
    }
    Ok(command)
}

fn targets(args: &[&str], usage: &str) -> Result<Vec<Target>> {
    at_least_one(args, usage)?
        .iter()
        .map(|t| Target::parse(t))
        .collect()
}

/// `set apt [-a] <pkg>... [-r <pkg>...]`; bare packages are additions.
fn parse_apt(args: &[&str]) -> Result<Command> {
    let mut add = Vec::new();
    let mut remove = Vec::new();
    let mut removing = false;
    for arg in args {
        match *arg {
            "-a" => removing = false,
            "-r" => removing = true,
            pkg if pkg.starts_with('-') => {
                return Err(FleetError::FormatError(format!("unknown flag '{pkg}'")));
            }
            pkg if removing => remove.push(pkg.to_string()),
            pkg => add.push(pkg.to_string()),
        }
    }
    if add.is_empty() && remove.is_empty() {
        return Err(FleetError::FormatError(
            "usage: set apt [-a] <pkg>... [-r <pkg>...]".to_string(),
        ));
    }
    Ok(Command::SetApt { add, remove })
}

/// `run [targets...] [-n <count>] [-p <port>] [-f <flag>]`. A dotted target
/// or a bare id range restarts existing containers; `-n` spawns new ones on
/// an image target (the selection when no target is given). Without `-n`
/// nothing is created.
fn parse_run(args: &[&str]) -> Result<Command> {
    let mut targets = Vec::new();
    let mut count = 0u32;
    let mut port = None;
    let mut flag = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match *arg {
            "-n" => {
                let raw = flag_value(&mut iter, "-n")?;
                count = raw.parse().map_err(|_| {
                    FleetError::FormatError(format!("'{raw}' is not a count"))
                })?;
            }
            "-p" => {
                let raw = flag_value(&mut iter, "-p")?;
                port = Some(raw.parse().map_err(|_| {
                    FleetError::FormatError(format!("'{raw}' is not a port number"))
                })?);
            }
            "-f" => flag = Some(flag_value(&mut iter, "-f")?.to_string()),
            other if other.starts_with('-') => {
                return Err(FleetError::FormatError(format!("unknown flag '{other}'")));
            }
            token => targets.push(RunTarget::parse(token)?),
        }
    }
    Ok(Command::Run {
        targets,
        count,
        port,
        flag,
    })
}

/// `rm image [names...] [-y]`.
fn parse_rm_image(args: &[&str]) -> Result<Command> {
    let mut names = Vec::new();
    let mut force = false;
    for arg in args {
        match *arg {
            "-y" => force = true,
            other if other.starts_with('-') => {
                return Err(FleetError::FormatError(format!("unknown flag '{other}'")));
            }
            name => names.push(name.to_string()),
        }
    }
    Ok(Command::RmImage { names, force })
}

fn flag_value<'a>(iter: &mut std::slice::Iter<'a, &'a str>, flag: &str) -> Result<&'a str> {
    iter.next()
        .copied()
        .ok_or_else(|| FleetError::FormatError(format!("'{flag}' needs a value")))
}
