mod ai;
mod app;
mod auth;
mod cli;
mod completions;
mod config;
mod db;
mod identity;
mod ingest;
mod remote;
mod suggest;
mod sync;

use std::io::Write;
use std::time::Duration;

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

fn print_json(value: &impl serde::Serialize) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).expect("json serialization should work")
    );
}

fn run() -> Result<(), app::AppError> {
    use clap::Parser;
    use cli::{AisleSubcommands, Commands, StoreSubcommands};
    use suggest::Suggestion;

    let cli = cli::Cli::parse();

    if let Commands::Init = &cli.command {
        let report = app::init(&cli.db, &cli.config)?;
        println!("database ready at {}", report.db_path);
        if report.config_created {
            println!("wrote starter config to {}", report.config_path);
        } else {
            println!("config already present at {}", report.config_path);
        }
        return Ok(());
    }
    if let Commands::Completions(args) = &cli.command {
        return completions::run(&args.shell);
    }

    let app = app::App::open(&cli.db, &cli.config)?;

    match cli.command {
        Commands::Store(args) => match args.command {
            StoreSubcommands::Add(add) => {
                let created = app.create_store(&app::NewStore {
                    name: &add.name,
                    lat: add.lat,
                    lng: add.lng,
                    address: add.address.as_deref(),
                    city: add.city.as_deref(),
                })?;
                if add.json {
                    print_json(&created);
                } else {
                    println!("created store {} {}", created.store.id, created.store.name);
                    match &created.share_error {
                        None => println!("shared to the backend"),
                        Some(reason) => println!("saved locally only: {}", reason),
                    }
                }
            }
            StoreSubcommands::Ls(list) => {
                let stores = match &list.query {
                    Some(query) => app.search_stores(query)?,
                    None => app.list_stores()?,
                };
                if list.json {
                    print_json(&stores);
                } else if stores.is_empty() {
                    println!("no stores yet; try 'aislemap store add'");
                } else {
                    for store in stores {
                        println!(
                            "{} {}{}{}",
                            store.id,
                            store.name,
                            store
                                .city
                                .as_deref()
                                .map(|city| format!(" ({city})"))
                                .unwrap_or_default(),
                            if store.remote_id.is_some() {
                                ""
                            } else {
                                " [local only]"
                            }
                        );
                    }
                }
            }
            StoreSubcommands::Show(show) => {
                let detail = app.show_store(&show.store)?;
                if show.json {
                    print_json(&detail);
                } else {
                    println!("{} {}", detail.store.id, detail.store.name);
                    if let Some(address) = &detail.store.address {
                        println!("  address: {}", address);
                    }
                    println!("  aisles: {}", detail.aisles.len());
                    for aisle in &detail.aisles {
                        println!("    {} [{}]", aisle.name, aisle.keywords.join(", "));
                    }
                    println!("  products: {}", detail.products.len());
                    for product in &detail.products {
                        println!(
                            "    {} -> {}",
                            product.name,
                            product.aisle_name.as_deref().unwrap_or("(unassigned)")
                        );
                    }
                }
            }
            StoreSubcommands::Edit(edit) => {
                let store = app.edit_store(
                    &edit.store,
                    edit.name.as_deref(),
                    edit.address.as_deref(),
                    edit.city.as_deref(),
                )?;
                println!("updated store {} {}", store.id, store.name);
            }
            StoreSubcommands::Rm(remove) => {
                let detail = app.show_store(&remove.store)?;
                if !remove.yes
                    && !confirm(&format!(
                        "delete store '{}' with {} aisle(s) and {} product(s)?",
                        detail.store.name,
                        detail.aisles.len(),
                        detail.products.len()
                    ))?
                {
                    println!("aborted");
                    return Ok(());
                }
                let store = app.delete_store(&detail.store.id)?;
                println!("deleted store {} {}", store.id, store.name);
            }
        },
        Commands::Aisle(args) => match args.command {
            AisleSubcommands::Add(add) => {
                let created = app.add_aisle(&add.store, &add.name, &add.keywords)?;
                if add.json {
                    print_json(&created);
                } else {
                    println!("created aisle {} {}", created.aisle.id, created.aisle.name);
                    match &created.share_error {
                        None => println!("shared to the backend"),
                        Some(reason) => println!("saved locally only: {}", reason),
                    }
                }
            }
            AisleSubcommands::Ls(list) => {
                let aisles = match &list.query {
                    Some(query) => app.search_aisles(&list.store, query)?,
                    None => app.list_aisles(&list.store)?,
                };
                if list.json {
                    print_json(&aisles);
                } else if aisles.is_empty() {
                    println!("no aisles mapped yet; try 'aislemap scan' or 'aislemap aisle add'");
                } else {
                    for aisle in aisles {
                        println!(
                            "{} {}{} [{}]",
                            aisle.id,
                            aisle.name,
                            if aisle.remote_id.is_some() {
                                ""
                            } else {
                                " (local only)"
                            },
                            aisle.keywords.join(", ")
                        );
                    }
                }
            }
            AisleSubcommands::Edit(edit) => {
                let aisle = app.edit_aisle(
                    &edit.store,
                    &edit.aisle,
                    edit.name.as_deref(),
                    &edit.add_keywords,
                    &edit.remove_keywords,
                )?;
                println!(
                    "updated aisle {} {} [{}]",
                    aisle.id,
                    aisle.name,
                    aisle.keywords.join(", ")
                );
            }
            AisleSubcommands::Rm(remove) => {
                if !remove.yes
                    && !confirm(&format!(
                        "delete aisle '{}'? products stay but lose their shelf",
                        remove.aisle
                    ))?
                {
                    println!("aborted");
                    return Ok(());
                }
                let aisle = app.remove_aisle(&remove.store, &remove.aisle)?;
                println!("deleted aisle {} {}", aisle.id, aisle.name);
            }
        },
        Commands::Items(items) => {
            let products = app.list_products(&items.store)?;
            if items.json {
                print_json(&products);
            } else if products.is_empty() {
                println!("no products recorded for this store yet");
            } else {
                for product in products {
                    println!(
                        "{} -> {}{}",
                        product.name,
                        product.aisle_name.as_deref().unwrap_or("(unassigned)"),
                        product
                            .barcode
                            .as_deref()
                            .map(|barcode| format!(" [{barcode}]"))
                            .unwrap_or_default()
                    );
                }
            }
        }
        Commands::Scan(scan) => {
            let outcome = app.scan_sign(&scan.store, &scan.image)?;
            if scan.json {
                print_json(&outcome);
            } else {
                println!(
                    "detected aisle '{}' with keywords [{}]",
                    outcome.title,
                    outcome.keywords.join(", ")
                );
                match &outcome.push_error {
                    None => println!("shared to the backend"),
                    Some(reason) => println!("saved locally only: {}", reason),
                }
            }
        }
        Commands::Find(find) => {
            let suggestion = app.suggest_aisle(&find.store, &find.product)?;
            if find.json {
                print_json(&suggestion);
            } else {
                match suggestion {
                    Suggestion::KnownProduct { aisle_name, .. } => {
                        println!("'{}' is shelved in {}", find.product, aisle_name);
                    }
                    Suggestion::LocalMatch {
                        aisle_name, score, ..
                    } => {
                        println!("'{}' is likely in {} (score {})", find.product, aisle_name, score);
                    }
                    Suggestion::Ranked { candidates } => {
                        println!("best guesses for '{}':", find.product);
                        for candidate in candidates {
                            println!(
                                "  {} ({}, {:.2}){}",
                                candidate.aisle_name,
                                candidate.confidence_label,
                                candidate.confidence_score,
                                candidate
                                    .reason
                                    .as_deref()
                                    .map(|reason| format!(" - {reason}"))
                                    .unwrap_or_default()
                            );
                        }
                    }
                    Suggestion::NotFound => {
                        println!("no aisle suggestion for '{}'", find.product);
                    }
                }
            }
        }
        Commands::Assign(assign) => {
            let outcome = app.assign_product(
                &assign.store,
                &assign.product,
                &assign.aisle,
                assign.barcode.as_deref(),
            )?;
            if assign.json {
                print_json(&outcome);
            } else {
                println!("recorded '{}' in aisle {}", assign.product, assign.aisle);
                match &outcome.push_error {
                    None => println!("shared to the backend"),
                    Some(reason) => println!("saved locally only: {}", reason),
                }
            }
        }
        Commands::Sync(sync) => {
            let report = app.sync_store(&sync.store)?;
            if sync.json {
                print_json(&report);
            } else {
                println!(
                    concat!(
                        "sync remote={} pushed(aisles={} products={}) ",
                        "aisles(updated={} adopted={} inserted={} deleted={}) ",
                        "products(updated={} adopted={} inserted={} deleted={})"
                    ),
                    report.store_remote_id,
                    report.pushed.aisles_pushed,
                    report.pushed.products_pushed,
                    report.aisles.updated,
                    report.aisles.adopted,
                    report.aisles.inserted,
                    report.aisles.deleted,
                    report.products.updated,
                    report.products.adopted,
                    report.products.inserted,
                    report.products.deleted
                );
            }
        }
        Commands::Watch(watch) => {
            let store = app.start_watch(&watch.store)?;
            let (aisle_state, product_state) = app.watch_state(&store.id)?;
            println!(
                "watching store {} (aisles: {}, products: {})",
                store.name,
                state_label(&aisle_state),
                state_label(&product_state)
            );
            match watch.duration {
                Some(seconds) => {
                    std::thread::sleep(Duration::from_secs(seconds));
                    app.stop_watch(&store.id)?;
                    println!("stopped watching {}", store.name);
                }
                None => {
                    println!("press Ctrl-C to stop");
                    loop {
                        std::thread::sleep(Duration::from_secs(60));
                    }
                }
            }
        }
        Commands::Init => unreachable!("init is handled before app initialization"),
        Commands::Completions(_) => {
            unreachable!("completions are handled before app initialization")
        }
    }

    Ok(())
}

fn state_label(state: &impl serde::Serialize) -> String {
    serde_json::to_string(state)
        .expect("state serialization should work")
        .trim_matches('"')
        .to_string()
}

fn confirm(message: &str) -> Result<bool, app::AppError> {
    print!("{} [y/N] ", message);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    let answer = answer.trim().to_ascii_lowercase();
    Ok(answer == "y" || answer == "yes")
}
