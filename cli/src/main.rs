use clap::{Parser, Subcommand};
use isoedit_builder::DiscImageEditor;
use isoedit_core::{BootDescriptor, EditorConfig};
use isoedit_filesystems::{DiscImage, TextEncoding};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::Level;

#[derive(Parser)]
#[command(name = "isoedit")]
#[command(about = "Inspect and rebuild Windows install media images", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON where supported
    #[arg(long, global = true)]
    json: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show filesystem information for an image
    Info {
        image: PathBuf,
    },
    /// List a directory inside an image
    Ls {
        image: PathBuf,
        #[arg(default_value = "/")]
        path: String,
    },
    /// Print a text file from an image
    Cat {
        image: PathBuf,
        path: String,
        /// Text encoding (utf-8, utf-16le, utf-16be, utf-16, latin-1)
        #[arg(short, long, default_value = "utf-8")]
        encoding: TextEncoding,
    },
    /// Extract one file from an image
    Extract {
        image: PathBuf,
        path: String,
        output: PathBuf,
    },
    /// Show the boot configuration of an image
    Boot {
        image: PathBuf,
    },
    /// Apply file operations and write a rebuilt image
    Edit {
        image: PathBuf,
        output: PathBuf,
        /// Add a local file: LOCAL=IMAGE_PATH
        #[arg(long = "add", value_name = "LOCAL=IMAGE_PATH")]
        add: Vec<String>,
        /// Replace a file: IMAGE_PATH=LOCAL
        #[arg(long = "replace", value_name = "IMAGE_PATH=LOCAL")]
        replace: Vec<String>,
        /// Remove a file or directory
        #[arg(long = "remove", value_name = "IMAGE_PATH")]
        remove: Vec<String>,
        /// Volume label for the rebuilt image
        #[arg(short = 'V', long)]
        label: Option<String>,
    },
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EditorConfig> {
    match path {
        Some(path) => Ok(EditorConfig::load(path)?),
        None => Ok(EditorConfig::default()),
    }
}

fn split_pair(value: &str, flag: &str) -> anyhow::Result<(String, String)> {
    value
        .split_once('=')
        .map(|(left, right)| (left.to_string(), right.to_string()))
        .ok_or_else(|| anyhow::anyhow!("--{} expects two paths joined by '=', got '{}'", flag, value))
}

fn print_descriptor(label: &str, descriptor: Option<&BootDescriptor>) {
    match descriptor {
        Some(d) => {
            println!("{}: {}", label, d.image_path);
            println!("  Load size: {} sectors", d.load_size);
            println!("  No emulation: {}", if d.no_emulation { "Yes" } else { "No" });
            println!("  Boot info table: {}", if d.uses_info_table { "Yes" } else { "No" });
        }
        None => println!("{}: none", label),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Info { image } => {
            let image = DiscImage::open(&image, &config)?;
            let info = image.get_filesystem_info();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("Image: {}", image.path().display());
                println!("  Variant: {}", info.variant);
                println!("  Label: {}", info.volume_label.as_deref().unwrap_or("(none)"));
                if let Some(level) = info.joliet_level {
                    println!("  Joliet level: {}", level);
                }
                if let Some(revision) = &info.udf_revision {
                    println!("  UDF revision: {}", revision);
                }
                println!("  Rock Ridge: {}", if info.has_rock_ridge { "Yes" } else { "No" });
                println!(
                    "  Size: {:.2} GB ({} blocks of {} bytes)",
                    info.volume_space_size as f64 * info.logical_block_size as f64 / 1_073_741_824.0,
                    info.volume_space_size,
                    info.logical_block_size
                );
                println!("  Boot catalog: {}", if info.has_boot_catalog { "Yes" } else { "No" });
            }
            image.close();
        }
        Commands::Ls { image, path } => {
            let mut image = DiscImage::open(&image, &config)?;
            let listing = image.list_directory(&path);
            if listing.is_empty() && !image.directory_exists(&path) {
                anyhow::bail!("No such directory in image: {}", path);
            }
            for name in listing.iter() {
                let child = if path.ends_with('/') {
                    format!("{}{}", path, name)
                } else {
                    format!("{}/{}", path, name)
                };
                if image.directory_exists(&child) {
                    println!("{}/", name);
                } else {
                    let size = image.get_file_size(&child).unwrap_or(0);
                    println!("{:>14}  {}", size, name);
                }
            }
            image.close();
        }
        Commands::Cat { image, path, encoding } => {
            let mut image = DiscImage::open(&image, &config)?;
            let text = image.read_file_text(&path, encoding)?;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(text.as_bytes())?;
            stdout.flush()?;
            image.close();
        }
        Commands::Extract { image, path, output } => {
            let mut image = DiscImage::open(&image, &config)?;
            image.extract_file(&path, &output).await?;
            println!("Extracted {} to {}", path, output.display());
            image.close();
        }
        Commands::Boot { image } => {
            let image = DiscImage::open(&image, &config)?;
            let boot = image.boot_info().clone();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&boot)?);
            } else {
                println!("Boot catalog: {}", if boot.has_catalog { "Yes" } else { "No" });
                println!("Catalog entries: {}", boot.catalog_entries);
                print_descriptor("BIOS", boot.bios.as_ref());
                print_descriptor("UEFI", boot.uefi.as_ref());
                if !boot.warnings.is_empty() {
                    println!("Warnings:");
                    for warning in &boot.warnings {
                        println!("  - {}", warning);
                    }
                }
            }
            image.close();
        }
        Commands::Edit { image, output, add, replace, remove, label } => {
            let config = EditorConfig {
                volume_label: label.or(config.volume_label),
                ..config
            };
            let mut editor = DiscImageEditor::open(&image, config)?;

            for pair in &add {
                let (local, image_path) = split_pair(pair, "add")?;
                editor.queue_add(local, &image_path)?;
            }
            for pair in &replace {
                let (image_path, local) = split_pair(pair, "replace")?;
                editor.queue_replace(&image_path, local)?;
            }
            for image_path in &remove {
                editor.queue_remove(image_path)?;
            }

            if !cli.json {
                println!("Rebuilding {} with {} queued operation(s)...", image.display(), editor.pending().len());
            }
            let result = editor.rebuild(&output).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", result.message);
                println!("  Size: {:.2} GB", result.output_size as f64 / 1_073_741_824.0);
                if !result.warnings.is_empty() {
                    println!("  Warnings:");
                    for warning in &result.warnings {
                        println!("    - {}", warning);
                    }
                }
            }
        }
    }

    Ok(())
}
