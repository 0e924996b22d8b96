use std::path::{Path, PathBuf};

use anyhow::Context as _;
use base64::Engine as _;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use oficina_app::{
  quote_pdf_filename, render_quote_pdf, Category, ClientPatch, DbState, Labels, Language, NewAnalysis, NewClient,
  NewLedgerEntry, NewReceipt, PhotoLoader, Quote, QuoteInput, RenderContext, SettingsPatch,
};

#[derive(Parser, Debug)]
#[command(name = "oficina", version, about = "Repair shop back office: intake, quotes, ledger")]
struct Cli {
  /// SQLite database file.
  #[arg(long, global = true, env = "OFICINA_DB", default_value = "oficina.db")]
  db: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Create the database (if missing) and print its settings.
  Init,

  #[command(subcommand)]
  Settings(SettingsCmd),

  #[command(subcommand)]
  Client(ClientCmd),

  #[command(subcommand)]
  Receipt(ReceiptCmd),

  #[command(subcommand)]
  Analysis(AnalysisCmd),

  #[command(subcommand)]
  Quote(QuoteCmd),

  #[command(subcommand)]
  Ledger(LedgerCmd),

  #[command(subcommand)]
  Report(ReportCmd),

  #[command(subcommand)]
  Export(ExportCmd),
}

#[derive(Subcommand, Debug)]
enum SettingsCmd {
  Show,
  Set(SettingsArgs),
}

#[derive(Args, Debug)]
struct SettingsArgs {
  #[arg(long)]
  company_name: Option<String>,
  #[arg(long)]
  tax_id: Option<String>,
  #[arg(long)]
  address: Option<String>,
  #[arg(long)]
  phone: Option<String>,
  #[arg(long)]
  email: Option<String>,
  /// PNG or JPEG file, stored inline.
  #[arg(long)]
  logo: Option<PathBuf>,
  #[arg(long)]
  language: Option<String>,
  #[arg(long)]
  quote_prefix: Option<String>,
  #[arg(long)]
  next_quote_number: Option<i64>,
  #[arg(long)]
  receipt_prefix: Option<String>,
  #[arg(long)]
  next_receipt_number: Option<i64>,
  #[arg(long)]
  payment_terms: Option<String>,
  #[arg(long)]
  delivery_time: Option<String>,
  #[arg(long)]
  warranty: Option<String>,
  #[arg(long)]
  validity_days: Option<i64>,
  /// TrueType font used for PDFs; pass an empty string for built-in Helvetica.
  #[arg(long)]
  font_path: Option<String>,
}

#[derive(Subcommand, Debug)]
enum ClientCmd {
  Add {
    #[arg(long)]
    name: String,
    #[arg(long, default_value = "")]
    tax_id: String,
    #[arg(long, default_value = "")]
    address: String,
    #[arg(long, default_value = "")]
    city: String,
    #[arg(long, default_value = "")]
    state: String,
    #[arg(long, default_value = "")]
    postal_code: String,
    #[arg(long, default_value = "")]
    email: String,
    #[arg(long, default_value = "")]
    phone: String,
  },
  List {
    #[arg(long)]
    search: Option<String>,
  },
  Show { id: String },
  /// Change only the fields passed.
  Update {
    id: String,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    tax_id: Option<String>,
    #[arg(long)]
    address: Option<String>,
    #[arg(long)]
    city: Option<String>,
    #[arg(long)]
    state: Option<String>,
    #[arg(long)]
    postal_code: Option<String>,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    phone: Option<String>,
  },
  Delete { id: String },
}

#[derive(Subcommand, Debug)]
enum ReceiptCmd {
  Add {
    #[arg(long)]
    client: String,
    #[arg(long)]
    equipment: String,
    #[arg(long, default_value = "")]
    brand: String,
    #[arg(long, default_value = "")]
    model: String,
    #[arg(long, default_value = "")]
    serial: String,
    /// `YYYY-MM-DD`
    #[arg(long)]
    date: String,
    #[arg(long, default_value = "")]
    issue: String,
    #[arg(long, default_value = "")]
    notes: String,
    /// Photo path or URL; repeatable.
    #[arg(long = "photo")]
    photos: Vec<String>,
  },
  List {
    #[arg(long)]
    client: Option<String>,
  },
  Show { id: String },
  Delete { id: String },
}

#[derive(Subcommand, Debug)]
enum AnalysisCmd {
  /// Record an analysis from a JSON file.
  Add { file: PathBuf },
  List { receipt: String },
  Show { id: String },
}

#[derive(Subcommand, Debug)]
enum QuoteCmd {
  /// Print a prefilled quote input as JSON, ready to edit and pass to `quote new`.
  Draft {
    #[arg(long, conflicts_with = "analysis", required_unless_present = "analysis")]
    receipt: Option<String>,
    #[arg(long)]
    analysis: Option<String>,
  },
  New { file: PathBuf },
  /// Save an edit; the previous state is kept as a revision.
  Edit { quote: String, file: PathBuf },
  Show { quote: String },
  List,
  Revisions { quote: String },
  /// Print one saved revision snapshot.
  Revision { quote: String, sequence: i64 },
  Delete { quote: String },
  Pdf {
    quote: String,
    /// `pt`, `pt-BR` or `en`.
    #[arg(long)]
    lang: String,
    /// Output file or directory.
    #[arg(long, default_value = ".")]
    out: PathBuf,
    /// Base directory for relative photo paths.
    #[arg(long)]
    photos_dir: Option<PathBuf>,
  },
}

#[derive(Subcommand, Debug)]
enum LedgerCmd {
  Add {
    /// gross-revenue, deduction, cost, operating-expense, financial-income,
    /// financial-expense or income-tax.
    #[arg(long, value_parser = parse_category)]
    category: Category,
    #[arg(long)]
    description: String,
    #[arg(long)]
    amount: f64,
    /// Competence date, `YYYY-MM-DD`.
    #[arg(long)]
    date: String,
    #[arg(long)]
    due: Option<String>,
    #[arg(long)]
    settled: Option<String>,
    #[arg(long)]
    quote: Option<String>,
  },
  Settle {
    id: String,
    #[arg(long)]
    date: String,
  },
  List {
    #[arg(long)]
    from: Option<String>,
    #[arg(long)]
    to: Option<String>,
  },
  Delete { id: String },
}

#[derive(Subcommand, Debug)]
enum ReportCmd {
  Dre {
    #[arg(long)]
    from: String,
    #[arg(long)]
    to: String,
    #[arg(long)]
    lang: Option<String>,
    #[arg(long)]
    json: bool,
  },
  Dfc {
    #[arg(long)]
    from: String,
    #[arg(long)]
    to: String,
    #[arg(long, default_value_t = 0.0)]
    opening: f64,
    #[arg(long)]
    lang: Option<String>,
    #[arg(long)]
    json: bool,
  },
}

#[derive(Subcommand, Debug)]
enum ExportCmd {
  Quotes {
    #[arg(long)]
    from: String,
    #[arg(long)]
    to: String,
    #[arg(long)]
    out: PathBuf,
  },
  Ledger {
    #[arg(long)]
    from: String,
    #[arg(long)]
    to: String,
    #[arg(long)]
    out: PathBuf,
  },
}

fn parse_category(s: &str) -> Result<Category, String> {
  Category::parse(s).ok_or_else(|| format!("unknown category: {s}"))
}

fn init_tracing() {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("oficina=info,oficina_app=info"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .init();
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
  let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
  serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn logo_data_url(path: &Path) -> anyhow::Result<String> {
  let ext = path
    .extension()
    .and_then(|e| e.to_str())
    .map(str::to_ascii_lowercase)
    .unwrap_or_default();
  let mime = match ext.as_str() {
    "png" => "image/png",
    "jpg" | "jpeg" => "image/jpeg",
    other => anyhow::bail!("unsupported logo format: {other:?}"),
  };
  let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
  Ok(format!(
    "data:{mime};base64,{}",
    base64::engine::general_purpose::STANDARD.encode(bytes)
  ))
}

/// Accepts either the quote id or its number.
async fn resolve_quote(db: &DbState, key: &str) -> anyhow::Result<Quote> {
  if let Some(q) = db.get_quote(key.to_string()).await? {
    return Ok(q);
  }
  match db.find_quote_by_number(key.to_string()).await? {
    Some(q) => Ok(q),
    None => anyhow::bail!("quote not found: {key}"),
  }
}

async fn report_language(db: &DbState, lang: Option<&str>) -> anyhow::Result<Language> {
  match lang {
    Some(l) => Ok(Language::parse(Some(l))?),
    None => Ok(db.get_settings().await?.language()?),
  }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  init_tracing();
  oficina_app::sanity_check_embedded_labels();

  let cli = Cli::parse();
  let db = DbState::open(&cli.db).with_context(|| format!("opening database {}", cli.db.display()))?;
  tracing::debug!(db = %cli.db.display(), "database opened");

  match cli.command {
    Command::Init => {
      print_json(&db.get_settings().await?)?;
      let info = db.database_info().await?;
      eprintln!(
        "database ready at {} (schema v{}, created {})",
        cli.db.display(),
        info.schema_version,
        info.created_at.as_deref().unwrap_or("unknown")
      );
    }

    Command::Settings(SettingsCmd::Show) => print_json(&db.get_settings().await?)?,
    Command::Settings(SettingsCmd::Set(a)) => {
      let logo_url = a.logo.as_deref().map(logo_data_url).transpose()?;
      let patch = SettingsPatch {
        company_name: a.company_name,
        company_tax_id: a.tax_id,
        company_address: a.address,
        company_phone: a.phone,
        company_email: a.email,
        logo_url,
        language: a.language,
        quote_prefix: a.quote_prefix,
        next_quote_number: a.next_quote_number,
        receipt_prefix: a.receipt_prefix,
        next_receipt_number: a.next_receipt_number,
        default_payment_terms: a.payment_terms,
        default_delivery_time: a.delivery_time,
        default_warranty: a.warranty,
        quote_validity_days: a.validity_days,
        font_path: a.font_path,
      };
      print_json(&db.update_settings(patch).await?)?;
    }

    Command::Client(ClientCmd::Add {
      name,
      tax_id,
      address,
      city,
      state,
      postal_code,
      email,
      phone,
    }) => {
      let client = db
        .create_client(NewClient {
          name,
          tax_id,
          address,
          city,
          state,
          postal_code,
          email,
          phone,
        })
        .await?;
      print_json(&client)?;
    }
    Command::Client(ClientCmd::List { search }) => print_json(&db.list_clients(search).await?)?,
    Command::Client(ClientCmd::Show { id }) => match db.get_client(id.clone()).await? {
      Some(client) => print_json(&client)?,
      None => anyhow::bail!("client not found: {id}"),
    },
    Command::Client(ClientCmd::Update {
      id,
      name,
      tax_id,
      address,
      city,
      state,
      postal_code,
      email,
      phone,
    }) => {
      let patch = ClientPatch {
        name,
        tax_id,
        address,
        city,
        state,
        postal_code,
        email,
        phone,
      };
      print_json(&db.update_client(id, patch).await?)?;
    }
    Command::Client(ClientCmd::Delete { id }) => {
      if !db.delete_client(id.clone()).await? {
        anyhow::bail!("client not found: {id}");
      }
    }

    Command::Receipt(ReceiptCmd::Add {
      client,
      equipment,
      brand,
      model,
      serial,
      date,
      issue,
      notes,
      photos,
    }) => {
      let photos = photos
        .into_iter()
        .map(|url| oficina_app::Photo {
          url,
          caption: None,
          include_in_document: true,
        })
        .collect();
      let receipt = db
        .create_receipt(NewReceipt {
          client_id: client,
          equipment,
          brand,
          model,
          serial_number: serial,
          received_at: date,
          reported_issue: issue,
          notes,
          photos,
        })
        .await?;
      print_json(&receipt)?;
    }
    Command::Receipt(ReceiptCmd::List { client }) => print_json(&db.list_receipts(client).await?)?,
    Command::Receipt(ReceiptCmd::Show { id }) => match db.get_receipt(id.clone()).await? {
      Some(receipt) => print_json(&receipt)?,
      None => anyhow::bail!("receipt not found: {id}"),
    },
    Command::Receipt(ReceiptCmd::Delete { id }) => {
      if !db.delete_receipt(id.clone()).await? {
        anyhow::bail!("receipt not found: {id}");
      }
    }

    Command::Analysis(AnalysisCmd::Add { file }) => {
      let input: NewAnalysis = read_json(&file)?;
      print_json(&db.create_analysis(input).await?)?;
    }
    Command::Analysis(AnalysisCmd::List { receipt }) => {
      print_json(&db.list_analyses_for_receipt(receipt).await?)?
    }
    Command::Analysis(AnalysisCmd::Show { id }) => match db.get_analysis(id.clone()).await? {
      Some(analysis) => print_json(&analysis)?,
      None => anyhow::bail!("analysis not found: {id}"),
    },

    Command::Quote(cmd) => run_quote(&db, cmd).await?,

    Command::Ledger(LedgerCmd::Add {
      category,
      description,
      amount,
      date,
      due,
      settled,
      quote,
    }) => {
      let entry = db
        .create_entry(NewLedgerEntry {
          category,
          description,
          amount,
          competence_date: date,
          due_date: due,
          settled_at: settled,
          quote_id: quote,
        })
        .await?;
      print_json(&entry)?;
    }
    Command::Ledger(LedgerCmd::Settle { id, date }) => print_json(&db.settle_entry(id, date).await?)?,
    Command::Ledger(LedgerCmd::List { from, to }) => print_json(&db.list_entries(from, to).await?)?,
    Command::Ledger(LedgerCmd::Delete { id }) => {
      if !db.delete_entry(id.clone()).await? {
        anyhow::bail!("ledger entry not found: {id}");
      }
    }

    Command::Report(ReportCmd::Dre { from, to, lang, json }) => {
      let report = db.dre_report(from, to).await?;
      if json {
        print_json(&report)?;
      } else {
        let lang = report_language(&db, lang.as_deref()).await?;
        let labels = Labels::for_language(lang);
        println!("{} ({} .. {})", labels.get("dreTitle"), report.from, report.to);
        for (key, value) in report.lines() {
          println!("{:<32} {:>18}", labels.get(key), lang.format_money(value));
        }
      }
    }
    Command::Report(ReportCmd::Dfc {
      from,
      to,
      opening,
      lang,
      json,
    }) => {
      let report = db.dfc_report(from, to, opening).await?;
      if json {
        print_json(&report)?;
      } else {
        let lang = report_language(&db, lang.as_deref()).await?;
        let labels = Labels::for_language(lang);
        println!("{} ({} .. {})", labels.get("dfcTitle"), report.from, report.to);
        println!(
          "{:<8} {:>16} {:>16} {:>16} {:>16}",
          labels.get("dfcMonth"),
          labels.get("dfcInflows"),
          labels.get("dfcOutflows"),
          labels.get("dfcNet"),
          labels.get("dfcBalance")
        );
        for m in &report.months {
          println!(
            "{:<8} {:>16} {:>16} {:>16} {:>16}",
            m.month,
            lang.format_money(m.inflows),
            lang.format_money(m.outflows),
            lang.format_money(m.net),
            lang.format_money(m.balance)
          );
        }
      }
    }

    Command::Export(ExportCmd::Quotes { from, to, out }) => {
      let path = db.export_quotes_csv(from, to, out).await?;
      println!("{}", path.display());
    }
    Command::Export(ExportCmd::Ledger { from, to, out }) => {
      let path = db.export_ledger_csv(from, to, out).await?;
      println!("{}", path.display());
    }
  }

  Ok(())
}

async fn run_quote(db: &DbState, cmd: QuoteCmd) -> anyhow::Result<()> {
  match cmd {
    QuoteCmd::Draft { receipt, analysis } => {
      let draft = match (receipt, analysis) {
        (_, Some(id)) => db.draft_quote_from_analysis(id).await?,
        (Some(id), None) => db.draft_quote_from_receipt(id).await?,
        (None, None) => anyhow::bail!("pass --receipt or --analysis"),
      };
      print_json(&draft)?;
    }
    QuoteCmd::New { file } => {
      let input: QuoteInput = read_json(&file)?;
      print_json(&db.create_quote(input).await?)?;
    }
    QuoteCmd::Edit { quote, file } => {
      let current = resolve_quote(db, &quote).await?;
      let input: QuoteInput = read_json(&file)?;
      print_json(&db.save_quote_edit(current.id, input).await?)?;
    }
    QuoteCmd::Show { quote } => print_json(&resolve_quote(db, &quote).await?)?,
    QuoteCmd::List => print_json(&db.list_quotes().await?)?,
    QuoteCmd::Revisions { quote } => {
      let current = resolve_quote(db, &quote).await?;
      print_json(&db.list_revisions(current.id).await?)?;
    }
    QuoteCmd::Revision { quote, sequence } => {
      let current = resolve_quote(db, &quote).await?;
      match db.get_revision(current.id, sequence).await? {
        Some(revision) => print_json(&revision)?,
        None => anyhow::bail!("{} has no revision {sequence}", current.number),
      }
    }
    QuoteCmd::Delete { quote } => {
      let current = resolve_quote(db, &quote).await?;
      db.delete_quote(current.id).await?;
    }
    QuoteCmd::Pdf {
      quote,
      lang,
      out,
      photos_dir,
    } => {
      let language = Language::parse(Some(&lang))?;
      let quote = resolve_quote(db, &quote).await?;
      let settings = db.get_settings().await?;
      let ctx = RenderContext::from_settings(&settings, language).context("loading render settings")?;

      let mut loader = PhotoLoader::new()?;
      if let Some(dir) = photos_dir {
        loader = loader.with_base_dir(dir);
      }

      let bytes = render_quote_pdf(&quote, &ctx, &loader)
        .await
        .with_context(|| format!("rendering {}", quote.number))?;

      let path = if out.is_dir() {
        out.join(quote_pdf_filename(&quote))
      } else {
        out
      };
      if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
      }
      std::fs::write(&path, &bytes).with_context(|| format!("writing {}", path.display()))?;
      tracing::info!(quote = %quote.number, path = %path.display(), bytes = bytes.len(), "pdf written");
      println!("{}", path.display());
    }
  }
  Ok(())
}
