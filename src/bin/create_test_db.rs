use std::path::Path;

use chrono::{SecondsFormat, Utc};
use donationbox_server::adapters::db::{
    get_device, insert_device, list_device_cuids, open_connection, run_migrations, schema_version,
};
use donationbox_server::domain::models::NewDeviceRecord;

struct Options {
    path: String,
    force: bool,
    devices: Vec<String>,
}

fn main() {
    if let Err(error) = run() {
        eprintln!("failed to create test db: {error}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let Some(options) = parse_args(std::env::args().skip(1).collect())? else {
        print_help();
        return Ok(());
    };

    let path = Path::new(&options.path);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .map_err(|error| format!("failed to create parent directory: {error}"))?;
    }

    if options.force && path.exists() {
        std::fs::remove_file(path)
            .map_err(|error| format!("failed to remove existing db file: {error}"))?;
    }

    let mut connection = open_connection(&options.path).map_err(|error| error.to_string())?;
    run_migrations(&mut connection).map_err(|error| error.to_string())?;

    let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    for cuid in &options.devices {
        if get_device(&connection, cuid)
            .map_err(|error| error.to_string())?
            .is_some()
        {
            println!("device already present: {cuid}");
            continue;
        }

        insert_device(
            &connection,
            &NewDeviceRecord {
                cuid: cuid.clone(),
                name: None,
                created_at: created_at.clone(),
            },
        )
        .map_err(|error| error.to_string())?;
        println!("seeded device: {cuid}");
    }

    let version = schema_version(&connection).map_err(|error| error.to_string())?;
    let device_count = list_device_cuids(&connection)
        .map_err(|error| error.to_string())?
        .len();

    println!("created/updated db at: {}", options.path);
    println!("schema version: {version}, devices: {device_count}");
    Ok(())
}

/// `Ok(None)` means help was requested.
fn parse_args(args: Vec<String>) -> Result<Option<Options>, String> {
    let mut options = Options {
        path: if cfg!(windows) {
            ".\\data\\donationbox_test.db".to_string()
        } else {
            "./data/donationbox_test.db".to_string()
        },
        force: false,
        devices: Vec::new(),
    };

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--path" => {
                options.path = args.next().ok_or("--path requires a value")?;
            }
            "--device" => {
                let cuid = args.next().ok_or("--device requires a cuid")?;
                if cuid.trim().is_empty() {
                    return Err("--device requires a non-empty cuid".to_string());
                }
                options.devices.push(cuid);
            }
            "--force" => options.force = true,
            "--help" | "-h" => return Ok(None),
            other => return Err(format!("unknown argument: {other}")),
        }
    }

    Ok(Some(options))
}

fn print_help() {
    println!("create_test_db");
    println!();
    println!("Usage:");
    println!("  cargo run --bin create_test_db -- [--path <file>] [--force] [--device <cuid>]...");
    println!();
    println!("Options:");
    println!("  --path <file>    target sqlite file (default: ./data/donationbox_test.db)");
    println!("  --force          delete existing file before creating");
    println!("  --device <cuid>  register a device so a box can authenticate against it");
}
