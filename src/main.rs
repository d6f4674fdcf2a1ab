use std::path::PathBuf;

fn main() {
    let opts = match parse_args(std::env::args().skip(1)) {
        Ok(Some(opts)) => opts,
        Ok(None) => return,
        Err(msg) => {
            eprintln!("error: {msg}");
            std::process::exit(2);
        }
    };

    if let Err(err) = gifreel::run(opts) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn parse_args(args: impl Iterator<Item = String>) -> Result<Option<gifreel::app::RunOptions>, String> {
    let mut opts = gifreel::app::RunOptions::default();
    let mut args = args;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("gifreel {}", gifreel::VERSION);
                return Ok(None);
            }
            "--help" | "-h" => {
                println!(
                    "gifreel - Scroll animated media from Reddit listings.\n\nUsage: gifreel [OPTIONS] [COLLECTION]\n\n  --config <path>      Read configuration from <path>\n  --version, -V        Show version and exit\n  --help,    -h        Show this help message\n\n{}",
                    gifreel::app::COMMAND_HELP
                );
                return Ok(None);
            }
            "--config" | "-c" => {
                let path = args.next().ok_or("--config requires a path")?;
                opts.config_file = Some(PathBuf::from(path));
            }
            flag if flag.starts_with('-') => return Err(format!("unknown option {flag}")),
            collection => opts.collection = Some(collection.to_string()),
        }
    }
    Ok(Some(opts))
}
