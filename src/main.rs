use std::path::PathBuf;

use map_picker::map::MapDefinition;
use map_picker::RunOptions;

const HELP: &str = "Map Picker - browse map previews from the terminal.

  --maps DIR           Directory of *.map.yaml descriptors
  --config FILE        Read configuration from FILE
  --dates              Show creation dates in the list
  --json               Print the chosen map as JSON
  --version, -V        Show version and exit
  --help,    -h        Show this help message";

struct Cli {
    run: RunOptions,
    json: bool,
}

fn main() {
    let cli = match parse_args(std::env::args().skip(1)) {
        Ok(Some(cli)) => cli,
        Ok(None) => return,
        Err(err) => {
            eprintln!("error: {err}\n\n{HELP}");
            std::process::exit(2);
        }
    };

    match map_picker::run(cli.run) {
        Ok(Some(map)) => {
            if let Err(err) = print_choice(&map, cli.json) {
                eprintln!("error: {err:?}");
                std::process::exit(1);
            }
        }
        Ok(None) => {}
        Err(err) => {
            eprintln!("error: {err:?}");
            std::process::exit(1);
        }
    }
}

/// Returns `None` when a flag was handled and the program should exit.
fn parse_args<I: Iterator<Item = String>>(mut args: I) -> Result<Option<Cli>, String> {
    let mut cli = Cli {
        run: RunOptions::default(),
        json: false,
    };
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("Map Picker {}", map_picker::VERSION);
                return Ok(None);
            }
            "--help" | "-h" => {
                println!("{HELP}");
                return Ok(None);
            }
            "--maps" => {
                let dir = args.next().ok_or("--maps needs a directory")?;
                cli.run.maps_dir = Some(PathBuf::from(dir));
            }
            "--config" => {
                let file = args.next().ok_or("--config needs a file")?;
                cli.run.config_file = Some(PathBuf::from(file));
            }
            "--dates" => cli.run.show_dates = true,
            "--json" => cli.json = true,
            other => return Err(format!("unknown argument '{other}'")),
        }
    }
    Ok(Some(cli))
}

fn print_choice(map: &MapDefinition, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(map)?);
        return Ok(());
    }
    println!("{} ({} players)", map.name, map.player_range());
    if let Some(path) = &map.path {
        println!("{}", path.display());
    }
    Ok(())
}
