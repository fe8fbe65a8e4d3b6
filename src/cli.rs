use std::path::PathBuf;

use clap::builder::styling::{AnsiColor, Effects, Styles};
use clap::{Args, Parser, Subcommand};

fn cli_styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::BrightCyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::BrightYellow.on_default() | Effects::BOLD)
        .literal(AnsiColor::BrightGreen.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::BrightMagenta.on_default())
}

#[derive(Debug, Parser)]
#[command(name = "aislemap")]
#[command(bin_name = "aislemap")]
#[command(version)]
#[command(about = "A collaborative store-aisle mapper with offline-first sync")]
#[command(styles = cli_styles())]
pub struct Cli {
    #[arg(
        short = 'd',
        long,
        env = "AISLEMAP_DB",
        default_value = ".aislemap/state.sqlite",
        help = "Path to the local SQLite database."
    )]
    pub db: String,

    #[arg(
        short = 'c',
        long,
        env = "AISLEMAP_CONFIG",
        default_value = ".aislemap/config.toml",
        help = "Path to the TOML config file."
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Create the local database and a starter config file.")]
    Init,
    #[command(about = "Manage stores.")]
    Store(StoreArgs),
    #[command(about = "Manage aisles within a store.")]
    Aisle(AisleArgs),
    #[command(about = "List known products for a store.")]
    Items(ItemsArgs),
    #[command(about = "Photograph an aisle sign into a new aisle.")]
    Scan(ScanArgs),
    #[command(about = "Ask which aisle a product is likely shelved in.")]
    Find(FindArgs),
    #[command(about = "Record a product's accepted aisle assignment.")]
    Assign(AssignArgs),
    #[command(about = "Push local changes and reconcile a fresh snapshot.")]
    Sync(SyncArgs),
    #[command(about = "Follow the live change feed for a store.")]
    Watch(WatchArgs),
    #[command(about = "Generate shell completions.")]
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct StoreArgs {
    #[command(subcommand)]
    pub command: StoreSubcommands,
}

#[derive(Debug, Subcommand)]
pub enum StoreSubcommands {
    #[command(about = "Add a store by name and optional location.")]
    Add(StoreAddArgs),
    #[command(about = "List stores.")]
    Ls(StoreListArgs),
    #[command(about = "Show one store with its aisles and products.")]
    Show(StoreSelectorArgs),
    #[command(about = "Edit a store's name or address.")]
    Edit(StoreEditArgs),
    #[command(about = "Delete a store, its aisles, and its products.")]
    Rm(StoreRemoveArgs),
}

#[derive(Debug, Args)]
pub struct StoreAddArgs {
    #[arg(help = "Store display name.")]
    pub name: String,

    #[arg(long, help = "Latitude of the storefront.")]
    pub lat: Option<f64>,

    #[arg(long, help = "Longitude of the storefront.")]
    pub lng: Option<f64>,

    #[arg(long, help = "Street address.")]
    pub address: Option<String>,

    #[arg(long, help = "City.")]
    pub city: Option<String>,

    #[arg(long, help = "Print the result as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct StoreListArgs {
    #[arg(short = 'q', long, help = "Filter by name substring.")]
    pub query: Option<String>,

    #[arg(long, help = "Print the result as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct StoreSelectorArgs {
    #[arg(help = "Store id or exact name.")]
    pub store: String,

    #[arg(long, help = "Print the result as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct StoreEditArgs {
    #[arg(help = "Store id or exact name.")]
    pub store: String,

    #[arg(long, help = "New display name.")]
    pub name: Option<String>,

    #[arg(long, help = "New street address.")]
    pub address: Option<String>,

    #[arg(long, help = "New city.")]
    pub city: Option<String>,
}

#[derive(Debug, Args)]
pub struct StoreRemoveArgs {
    #[arg(help = "Store id or exact name.")]
    pub store: String,

    #[arg(long, help = "Skip the confirmation prompt.")]
    pub yes: bool,
}

#[derive(Debug, Args)]
pub struct AisleArgs {
    #[command(subcommand)]
    pub command: AisleSubcommands,
}

#[derive(Debug, Subcommand)]
pub enum AisleSubcommands {
    #[command(about = "Add an aisle by name or number.")]
    Add(AisleAddArgs),
    #[command(about = "List a store's aisles.")]
    Ls(AisleListArgs),
    #[command(about = "Edit an aisle's name or keywords.")]
    Edit(AisleEditArgs),
    #[command(about = "Delete an aisle (products stay, unassigned).")]
    Rm(AisleRemoveArgs),
}

#[derive(Debug, Args)]
pub struct AisleAddArgs {
    #[arg(short = 's', long, help = "Store id or exact name.")]
    pub store: String,

    #[arg(help = "Aisle name or number.")]
    pub name: String,

    #[arg(short = 'k', long = "keyword", help = "Keyword for this aisle; repeatable.")]
    pub keywords: Vec<String>,

    #[arg(long, help = "Print the result as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct AisleListArgs {
    #[arg(short = 's', long, help = "Store id or exact name.")]
    pub store: String,

    #[arg(short = 'q', long, help = "Filter by name or keyword substring.")]
    pub query: Option<String>,

    #[arg(long, help = "Print the result as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct AisleEditArgs {
    #[arg(short = 's', long, help = "Store id or exact name.")]
    pub store: String,

    #[arg(help = "Aisle id or exact name.")]
    pub aisle: String,

    #[arg(long, help = "New aisle name or number.")]
    pub name: Option<String>,

    #[arg(long = "add-keyword", help = "Keyword to add; repeatable.")]
    pub add_keywords: Vec<String>,

    #[arg(long = "remove-keyword", help = "Keyword to remove; repeatable.")]
    pub remove_keywords: Vec<String>,
}

#[derive(Debug, Args)]
pub struct AisleRemoveArgs {
    #[arg(short = 's', long, help = "Store id or exact name.")]
    pub store: String,

    #[arg(help = "Aisle id or exact name.")]
    pub aisle: String,

    #[arg(long, help = "Skip the confirmation prompt.")]
    pub yes: bool,
}

#[derive(Debug, Args)]
pub struct ItemsArgs {
    #[arg(short = 's', long, help = "Store id or exact name.")]
    pub store: String,

    #[arg(long, help = "Print the result as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    #[arg(short = 's', long, help = "Store id or exact name.")]
    pub store: String,

    #[arg(help = "Path to the aisle-sign photo (jpg, png, webp, heic).")]
    pub image: PathBuf,

    #[arg(long, help = "Print the result as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct FindArgs {
    #[arg(short = 's', long, help = "Store id or exact name.")]
    pub store: String,

    #[arg(help = "Product name to look up.")]
    pub product: String,

    #[arg(long, help = "Print the result as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct AssignArgs {
    #[arg(short = 's', long, help = "Store id or exact name.")]
    pub store: String,

    #[arg(help = "Product name.")]
    pub product: String,

    #[arg(help = "Aisle id or exact name the product belongs to.")]
    pub aisle: String,

    #[arg(long, help = "Product barcode.")]
    pub barcode: Option<String>,

    #[arg(long, help = "Print the result as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct SyncArgs {
    #[arg(short = 's', long, help = "Store id or exact name.")]
    pub store: String,

    #[arg(long, help = "Print the result as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    #[arg(short = 's', long, help = "Store id or exact name.")]
    pub store: String,

    #[arg(
        long = "for",
        value_name = "SECONDS",
        help = "Stop after this many seconds instead of running until interrupted."
    )]
    pub duration: Option<u64>,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    #[arg(help = "Shell name (bash, zsh, fish).")]
    pub shell: String,
}
