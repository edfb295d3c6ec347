//! Import house manual entries into the database
//!
//! Usage: cargo run --bin import_manuals <manuals.json> <house.db> [--seed]
//!
//! manuals.json is a JSON array of `{"title", "body", "keywords"}` objects.
//! Keywords may be a comma-separated string or an array. Entries are matched
//! by title: existing titles are updated, new ones inserted.

use std::path::Path;

use sharehouse_bot::house::Database;
use sharehouse_bot::house::manual::{default_manuals, load_manuals_file};

fn usage(program: &str) -> ! {
    eprintln!("Usage: {} <manuals.json> <house.db> [--seed]", program);
    eprintln!();
    eprintln!("Upsert house manual entries into the bot database.");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  manuals.json  JSON array of {{\"title\", \"body\", \"keywords\"}}");
    eprintln!("  house.db      Path to the bot database (created if missing)");
    eprintln!("  --seed        Also insert the built-in entries whose titles are missing");
    std::process::exit(1);
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 || args.len() > 4 {
        usage(&args[0]);
    }
    let seed_defaults = match args.get(3).map(String::as_str) {
        None => false,
        Some("--seed") => true,
        Some(_) => usage(&args[0]),
    };

    let manuals_path = Path::new(&args[1]);
    let db_path = Path::new(&args[2]);

    println!("Reading manuals from {:?}...", manuals_path);
    let seeds = match load_manuals_file(manuals_path) {
        Ok(seeds) => seeds,
        Err(e) => {
            eprintln!("ERROR: {e}");
            std::process::exit(1);
        }
    };
    println!("Entries in file: {}", seeds.len());

    let db = match Database::open(db_path) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("ERROR: failed to open {:?}: {e}", db_path);
            std::process::exit(1);
        }
    };

    let before = db.manuals().map(|m| m.len()).unwrap_or(0);
    println!("Existing manuals: {}", before);

    if seed_defaults {
        let mut seeded = 0;
        for seed in default_manuals() {
            match db.insert_manual_if_missing(&seed) {
                Ok(true) => seeded += 1,
                Ok(false) => {}
                Err(e) => {
                    eprintln!("ERROR: failed to seed {:?}: {e}", seed.title);
                    std::process::exit(1);
                }
            }
        }
        println!("Built-in entries added: {}", seeded);
    }

    for seed in &seeds {
        if let Err(e) = db.upsert_manual(seed) {
            eprintln!("ERROR: failed to import {:?}: {e}", seed.title);
            std::process::exit(1);
        }
    }

    let after = db.manuals().map(|m| m.len()).unwrap_or(0);
    println!("New manuals added: {}", after.saturating_sub(before));
    println!("Total manuals after import: {}", after);
    println!("Saved to {:?}", db_path);
}
