//! dbf-commander CLI - inspect, create, filter, convert and import DBF files

use clap::{Parser, Subcommand, ValueEnum};
use dbf_commander::{
    convert, detect_encoding, import::CsvImportOptions, import_csv_to_dbf, import_xml_to_dbf, to_xml, Codepage,
    CsvOptions, DbfHeader, FieldSpec, ImportOutcome, Session, Settings, XmlImportOptions,
};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "dbf-commander")]
#[command(about = "Inspect, filter, convert and import xBase (.dbf) files")]
#[command(version)]
struct Cli {
    /// Settings file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the field structure of a DBF file
    Info {
        /// DBF file
        file: PathBuf,
    },

    /// Create an empty DBF file
    New {
        file: PathBuf,

        /// Field list such as "ID N(10,0); NAME C(30); SINCE D"
        #[arg(short, long)]
        fields: Option<String>,
    },

    /// Convert the text encoding of a file in place
    Convert {
        file: PathBuf,

        /// Source code page (default from settings)
        #[arg(short, long)]
        from: Option<Codepage>,

        /// Target code page (default from settings)
        #[arg(short, long)]
        to: Option<Codepage>,

        /// Do not copy the file aside first
        #[arg(long)]
        no_backup: bool,
    },

    /// Guess the code page of one or more files
    Detect {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Run SQL against a DBF file and print one page of the result
    Query {
        file: PathBuf,

        /// Query text; the file is available as `data`
        sql: String,

        /// Page to print, starting at 1
        #[arg(short, long, default_value_t = 1)]
        page: usize,
    },

    /// Export a DBF file, or a query over it, as CSV, JSON or XML
    Export {
        file: PathBuf,

        #[arg(short, long, value_enum, default_value = "csv")]
        format: ExportFormat,

        /// Export the result of this query instead of the whole file
        #[arg(short, long)]
        query: Option<String>,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// CSV field delimiter
        #[arg(short, long, default_value_t = ',')]
        delimiter: char,

        /// Leave out the CSV header row
        #[arg(long)]
        no_header: bool,
    },

    /// Import a CSV or XML file into a DBF file.
    ///
    /// Records are appended when the DBF file exists, otherwise it is created.
    Import {
        input: PathBuf,

        /// DBF file (defaults to the input name with .dbf)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Input format (from the file extension if omitted)
        #[arg(long, value_enum)]
        format: Option<ImportFormat>,

        /// CSV field delimiter (detected if omitted)
        #[arg(short, long)]
        delimiter: Option<char>,

        /// The first CSV row is data, not column names
        #[arg(long)]
        no_header: bool,

        /// XML element holding one record
        #[arg(long, default_value = "record")]
        record_tag: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportFormat {
    Csv,
    Json,
    Xml,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ImportFormat {
    Csv,
    Xml,
}

impl ImportFormat {
    fn from_path(path: &Path) -> ImportFormat {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("xml") => ImportFormat::Xml,
            _ => ImportFormat::Csv,
        }
    }
}

fn main() -> ExitCode {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let settings = match &cli.config {
        Some(path) => Settings::load_or_default(path)?,
        None => Settings::default(),
    };

    match cli.command {
        Commands::Info { file } => {
            let header = DbfHeader::read(&file)?;
            print!("{}", header.structure_report(&file.display().to_string()));
        }

        Commands::New { file, fields } => {
            let fields = match fields {
                Some(text) => FieldSpec::parse_list(&text)?,
                None => Vec::new(),
            };
            let session = Session::create_dbf(&file, &fields, settings)?;
            println!("Created {}", file.display());
            for column in session.base().columns() {
                println!("  {} {}", column.name(), column.column_type().name());
            }
        }

        Commands::Convert {
            file,
            from,
            to,
            no_backup,
        } => {
            let from = from.unwrap_or(settings.source_codepage);
            let to = to.unwrap_or(settings.target_codepage);
            let report = convert(&file, from, to, settings.backup_on_convert && !no_backup)?;
            println!(
                "Converted {} from {} to {} ({} -> {} bytes)",
                report.path.display(),
                report.from,
                report.to,
                report.bytes_before,
                report.bytes_after
            );
            if let Some(backup) = report.backup {
                println!("Backup: {}", backup.display());
            }
            if report.lossy {
                println!("Warning: some characters could not be represented and were replaced");
            }
        }

        Commands::Detect { files } => {
            for file in files {
                println!("{}: {}", file.display(), detect_encoding(&file)?);
            }
        }

        Commands::Query { file, sql, page } => {
            let mut session = Session::open_dbf(&file, settings)?;
            session.execute_query(&sql)?;
            session.go_to_page(page.saturating_sub(1));

            let current = session.current_page();
            let active = session.active();
            let columns: Vec<&str> = active.schema().get_column_names();
            println!("{}", columns.join(","));
            for row in current.rows {
                let cells: Vec<String> = row.iter().map(|c| c.to_string()).collect();
                println!("{}", cells.join(","));
            }
            println!("{} ({} rows)", session.page_label(), active.len());
        }

        Commands::Export {
            file,
            format,
            query,
            output,
            delimiter,
            no_header,
        } => {
            let mut session = Session::open_dbf(&file, settings)?;
            if let Some(sql) = query {
                session.execute_query(&sql)?;
            }
            let content = match format {
                ExportFormat::Csv => session.active().to_csv(&CsvOptions {
                    delimiter,
                    include_header: !no_header,
                    ..CsvOptions::default()
                }),
                ExportFormat::Json => session.active().to_json()?,
                ExportFormat::Xml => to_xml(session.active())?,
            };
            write_output(output.as_deref(), &content)?;
        }

        Commands::Import {
            input,
            output,
            format,
            delimiter,
            no_header,
            record_tag,
        } => {
            let target = output.unwrap_or_else(|| input.with_extension("dbf"));
            let outcome = match format.unwrap_or_else(|| ImportFormat::from_path(&input)) {
                ImportFormat::Csv => {
                    let options = CsvImportOptions {
                        delimiter,
                        has_header: !no_header,
                    };
                    import_csv_to_dbf(&input, &target, &options, settings)?
                }
                ImportFormat::Xml => {
                    let options = XmlImportOptions { record_tag };
                    import_xml_to_dbf(&input, &target, &options, settings)?
                }
            };
            match outcome {
                ImportOutcome::Created(report) => {
                    println!("Wrote {} records to {}", report.records, report.path.display());
                    for field in &report.fields {
                        println!("  {}", field);
                    }
                }
                ImportOutcome::Appended { append, save } => {
                    println!("Appended {} records to {}", append.appended, target.display());
                    if !append.ignored.is_empty() {
                        println!("Ignored columns: {}", append.ignored.join(", "));
                    }
                    if let Some(backup) = save.and_then(|s| s.backup) {
                        println!("Backup: {}", backup.display());
                    }
                }
            }
        }
    }

    Ok(())
}

fn write_output(path: Option<&Path>, content: &str) -> Result<(), Box<dyn Error>> {
    match path {
        Some(path) => std::fs::write(path, content)?,
        None => print!("{}", content),
    }
    Ok(())
}
