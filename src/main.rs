//! mstoolkit CLI
//!
//! Thin command-line surface over the library: Store product resolution,
//! WinGet catalog queries and manifest fetches, MSI database editing, and
//! the installed-program inventory. The hidden `extract-token` subcommand
//! is what the SYSTEM-scope scheduled task and the elevated helper run.

use clap::{Parser, Subcommand};
use mstoolkit::auth::{extract_token_to_file, TokenOptions};
use mstoolkit::context::AppContext;
use mstoolkit::error::Result;
use mstoolkit::msi::{MsiDatabase, MsiOpenMode};
use mstoolkit::platform::ArchSelection;
use mstoolkit::store::{DisplayCatalogEndpoint, PipelineOptions, StorePipeline};
use mstoolkit::winget::{
    CatalogOptions, InstallerScope, PackageFilter, WingetCatalog, WingetManifestFetcher,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;

#[derive(Parser)]
#[command(name = "mstoolkit")]
#[command(author, version, about = "Microsoft Store, WinGet, and MSI toolkit", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Microsoft Store operations
    #[command(subcommand)]
    Store(StoreCommands),
    /// WinGet catalog operations
    #[command(subcommand)]
    Winget(WingetCommands),
    /// MSI database operations
    #[command(subcommand)]
    Msi(MsiCommands),
    /// List installed programs
    Installed {
        /// Skip the AppX inventory
        #[arg(long)]
        no_appx: bool,
    },
    /// Extract the device token to a file (used by the elevation helpers)
    #[command(hide = true)]
    ExtractToken {
        #[arg(long)]
        output: PathBuf,
        #[arg(long)]
        marker: Option<PathBuf>,
    },
    /// Print the current device token
    Token {
        /// Bypass the caches and re-extract
        #[arg(long)]
        refresh: bool,
        /// Allow launching an elevated helper
        #[arg(long)]
        elevate: bool,
    },
}

#[derive(Subcommand)]
enum StoreCommands {
    /// Resolve a product into its unified download view
    Info {
        product_id: String,
        #[arg(long, default_value = "US")]
        market: String,
        #[arg(long, default_value = "en")]
        language: String,
        /// Architecture policy: All, Autodetect, or an exact architecture
        #[arg(long, default_value = "Autodetect")]
        arch: String,
        /// Keep every package version instead of only the newest
        #[arg(long)]
        all_versions: bool,
        /// Query the Int (pre-production) DisplayCatalog ring
        #[arg(long)]
        int_ring: bool,
    },
    /// Resolve a product and download its packages
    Download {
        product_id: String,
        /// Target directory
        #[arg(long, default_value = ".")]
        out: PathBuf,
        #[arg(long, default_value = "US")]
        market: String,
        #[arg(long, default_value = "en")]
        language: String,
        #[arg(long, default_value = "Autodetect")]
        arch: String,
    },
}

#[derive(Subcommand)]
enum WingetCommands {
    /// Download and extract the catalog database
    Update {
        #[arg(long)]
        source_url: Option<String>,
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// Keep the downloaded source2.msix archive
        #[arg(long)]
        keep_archive: bool,
    },
    /// Substring search across package name, id, and moniker
    Search {
        term: String,
        #[arg(long, default_value_t = 25)]
        limit: u32,
        /// Also match the normalized publisher
        #[arg(long)]
        publisher: bool,
        /// Use an already-extracted database instead of downloading
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Show one package row and its MSI product codes
    Info {
        package_id: String,
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Fetch a package manifest (latest version unless given)
    Manifest {
        package_id: String,
        #[arg(long)]
        version: Option<String>,
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Select an installer from a package manifest
    Installer {
        package_id: String,
        #[arg(long, default_value = "x64")]
        arch: String,
        #[arg(long)]
        backup_arch: Option<String>,
        #[arg(long, default_value = "machine")]
        scope: String,
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// List catalog tables, or one table's schema
    Tables {
        table: Option<String>,
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum MsiCommands {
    /// Read one property, or all properties
    Property {
        file: PathBuf,
        name: Option<String>,
    },
    /// Set a property (UPDATE when present, INSERT otherwise)
    SetProperty {
        file: PathBuf,
        name: String,
        value: String,
    },
    /// Decode the Summary Information stream
    Summary { file: PathBuf },
    /// List the `_Streams` table
    Streams { file: PathBuf },
    /// Extract a Binary table payload
    ExtractBinary {
        file: PathBuf,
        name: String,
        out: PathBuf,
    },
    /// Replace or insert a Binary table payload
    SetBinary {
        file: PathBuf,
        name: String,
        input: PathBuf,
    },
    /// Replace or create a raw stream
    SetStream {
        file: PathBuf,
        name: String,
        input: PathBuf,
    },
    /// Run a SELECT (or bare table name) against the database
    Query { file: PathBuf, sql: String },
}

fn main() {
    if let Err(e) = mstoolkit::utils::init_logging() {
        eprintln!("warning: logging unavailable: {e}");
    }

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        error!("command failed: {e}");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Store(command) => run_store(command),
        Commands::Winget(command) => run_winget(command),
        Commands::Msi(command) => run_msi(command),
        Commands::Installed { no_appx } => {
            let programs = mstoolkit::installed::scan_installed_programs(!no_appx);
            print_json(&programs)
        }
        Commands::ExtractToken { output, marker } => {
            extract_token_to_file(&output, marker.as_deref())
        }
        Commands::Token { refresh, elevate } => {
            let context = AppContext::new()?;
            let token = context.tokens().get(TokenOptions {
                elevate_if_needed: elevate,
                skip_cache: refresh,
            });
            println!("{token}");
            Ok(())
        }
    }
}

fn run_store(command: StoreCommands) -> Result<()> {
    let context = AppContext::new()?;
    match command {
        StoreCommands::Info {
            product_id,
            market,
            language,
            arch,
            all_versions,
            int_ring,
        } => {
            let pipeline = StorePipeline::new(
                context.http(),
                context.tokens(),
                context.installed_programs(),
            );
            let options = PipelineOptions {
                market,
                language,
                architecture: arch.parse::<ArchSelection>().unwrap_or(ArchSelection::Autodetect),
                latest_versions_only: !all_versions,
                endpoint: if int_ring {
                    DisplayCatalogEndpoint::Int
                } else {
                    DisplayCatalogEndpoint::Production
                },
            };
            let app = pipeline.get_unified_store_app_info(&product_id, &options)?;
            print_json(&app)
        }
        StoreCommands::Download {
            product_id,
            out,
            market,
            language,
            arch,
        } => {
            let pipeline = StorePipeline::new(
                context.http(),
                context.tokens(),
                context.installed_programs(),
            );
            let options = PipelineOptions {
                market,
                language,
                architecture: arch.parse::<ArchSelection>().unwrap_or(ArchSelection::Autodetect),
                ..PipelineOptions::default()
            };
            let app = pipeline.get_unified_store_app_info(&product_id, &options)?;
            match app.download {
                Some(download) => {
                    let paths = pipeline.download_packages(&download.packages, &out)?;
                    for path in paths {
                        println!("{}", path.display());
                    }
                    Ok(())
                }
                None => {
                    // Win32 products carry a single installer URL.
                    if let Some(installer) = app.installer {
                        println!("{}", installer.url);
                    }
                    Ok(())
                }
            }
        }
    }
}

/// Open the catalog from `--db` or download it fresh
fn catalog_for(context: &AppContext, db: Option<PathBuf>) -> Result<Arc<WingetCatalog>> {
    if let Some(db_path) = db {
        let catalog = WingetCatalog::open_existing(db_path, mstoolkit::winget::DEFAULT_SOURCE_URL)?;
        let catalog = Arc::new(catalog);
        context.set_winget_catalog(Arc::clone(&catalog));
        return Ok(catalog);
    }
    if let Some(catalog) = context.winget_catalog() {
        return Ok(catalog);
    }
    let catalog = Arc::new(WingetCatalog::open(
        context.http(),
        &CatalogOptions::default(),
    )?);
    context.set_winget_catalog(Arc::clone(&catalog));
    Ok(catalog)
}

fn run_winget(command: WingetCommands) -> Result<()> {
    let context = AppContext::new()?;
    match command {
        WingetCommands::Update {
            source_url,
            out_dir,
            keep_archive,
        } => {
            let catalog = WingetCatalog::open(
                context.http(),
                &CatalogOptions {
                    source_url,
                    output_dir: out_dir,
                    keep_archive,
                },
            )?;
            println!("database: {}", catalog.database_path().display());
            println!("source:   {}", catalog.source_url());
            println!("size:     {:.1} MB", catalog.database_size_mb());
            println!("manifests: {}", catalog.count()?);
            Ok(())
        }
        WingetCommands::Search {
            term,
            limit,
            publisher,
            db,
        } => {
            let catalog = catalog_for(&context, db)?;
            let rows = catalog.search_packages(&term, publisher, limit)?;
            print_json(&rows)
        }
        WingetCommands::Info { package_id, db } => {
            let catalog = catalog_for(&context, db)?;
            let row = catalog.get_packages(&PackageFilter::Id(package_id.clone()), 1)?;
            let codes = catalog.get_product_codes(&package_id).unwrap_or_default();
            print_json(&serde_json::json!({ "package": row, "product_codes": codes }))
        }
        WingetCommands::Manifest {
            package_id,
            version,
            db,
        } => {
            let catalog = catalog_for(&context, db)?;
            let fetcher = WingetManifestFetcher::new(context.http(), &catalog);
            let manifest = fetcher.get_manifest(&package_id, version.as_deref())?;
            println!("{}", serde_yaml::to_string(&manifest)?);
            Ok(())
        }
        WingetCommands::Installer {
            package_id,
            arch,
            backup_arch,
            scope,
            db,
        } => {
            let catalog = catalog_for(&context, db)?;
            let fetcher = WingetManifestFetcher::new(context.http(), &catalog);
            let selected = fetcher.get_package_installer(
                &package_id,
                &arch,
                backup_arch.as_deref(),
                scope.parse::<InstallerScope>()?,
            )?;
            println!("url:    {}", selected.url);
            println!("type:   {}", selected.installer_type);
            if let Some(nested) = &selected.nested_installer_type {
                println!("nested: {nested}");
            }
            println!("silent: {}", selected.silent);
            println!("scope:  {}", selected.scope);
            Ok(())
        }
        WingetCommands::Tables { table, db } => {
            let catalog = catalog_for(&context, db)?;
            match table {
                Some(table) => print_json(&catalog.schema(&table)?),
                None => print_json(&catalog.tables()?),
            }
        }
    }
}

fn run_msi(command: MsiCommands) -> Result<()> {
    match command {
        MsiCommands::Property { file, name } => {
            let mut database = MsiDatabase::open(file);
            database.open_database(MsiOpenMode::ReadOnly)?;
            let properties = database.get_property(name.as_deref())?;
            for (key, value) in properties {
                println!("{key}={value}");
            }
            Ok(())
        }
        MsiCommands::SetProperty { file, name, value } => {
            let mut database = MsiDatabase::open(file);
            database.open_database(MsiOpenMode::Transact)?;
            database.set_property(&name, &value)?;
            database.commit()?;
            println!("{name}={value}");
            Ok(())
        }
        MsiCommands::Summary { file } => {
            let mut database = MsiDatabase::open(file);
            database.open_database(MsiOpenMode::ReadOnly)?;
            print_json(&database.get_summary()?)
        }
        MsiCommands::Streams { file } => {
            let mut database = MsiDatabase::open(file);
            database.open_database(MsiOpenMode::ReadOnly)?;
            for name in database.get_streams()? {
                println!("{name}");
            }
            Ok(())
        }
        MsiCommands::ExtractBinary { file, name, out } => {
            let mut database = MsiDatabase::open(file);
            database.open_database(MsiOpenMode::ReadOnly)?;
            database.get_binary(&name, &out)?;
            println!("{}", out.display());
            Ok(())
        }
        MsiCommands::SetBinary { file, name, input } => {
            let mut database = MsiDatabase::open(file);
            database.open_database(MsiOpenMode::Transact)?;
            database.set_binary(&name, &input)?;
            database.commit()
        }
        MsiCommands::SetStream { file, name, input } => {
            let mut database = MsiDatabase::open(file);
            database.open_database(MsiOpenMode::Transact)?;
            database.update_stream(&name, &input)?;
            database.commit()
        }
        MsiCommands::Query { file, sql } => {
            let mut database = MsiDatabase::open(file);
            database.open_database(MsiOpenMode::ReadOnly)?;
            print_json(&database.execute_sql(&sql)?)
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
