use std::path::PathBuf;

use marklastread::Command;

fn main() {
    let command = match parse_cli_flags() {
        Ok(Some(command)) => command,
        Ok(None) => return,
        Err(message) => {
            eprintln!("error: {message}");
            std::process::exit(2);
        }
    };

    if let Err(err) = marklastread::run(command) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

/// Returns `None` when the flags were fully handled here.
fn parse_cli_flags() -> Result<Option<Command>, String> {
    let mut args = std::env::args().skip(1);
    let mut command = None;
    let mut saw_flag = false;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("marklastread {}", marklastread::VERSION);
                saw_flag = true;
            }
            "--help" | "-h" => {
                println!(
                    "marklastread - Remember the last read post and scroll back to it.\n\n  --simulate <file>    Replay a YAML timeline scenario and print the report\n  --last-read          Show the stored last read id\n  --reset              Forget the stored last read id\n  --version, -V        Show version and exit\n  --help,    -h        Show this help message"
                );
                saw_flag = true;
            }
            "--simulate" => {
                let path = args
                    .next()
                    .ok_or_else(|| "--simulate needs a scenario file".to_string())?;
                command = Some(Command::Simulate(PathBuf::from(path)));
            }
            "--last-read" => command = Some(Command::ShowLastRead),
            "--reset" => command = Some(Command::ResetLastRead),
            other => return Err(format!("unknown argument {other:?}; try --help")),
        }
    }
    match command {
        Some(command) => Ok(Some(command)),
        None if saw_flag => Ok(None),
        None => Err("nothing to do; try --help".into()),
    }
}
