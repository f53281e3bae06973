use anyhow::{Context, Result, anyhow, bail};
use arboard::Clipboard;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use snaplist_core::{
    Config, ListingItem, ProviderKind, ReviewSession, Snaplist, Ticket,
    capture::photos_in_dir,
    image_processing::{EncodedImage, ImageProcessor},
    init,
    providers::ItemField,
    review::ReviewPhase,
    ui,
};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Draft resale listings from photos", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyse photos of one item and review the draft listing
    Analyze {
        /// Photos of the item, in order; a directory adds every photo in it
        #[arg(required = true)]
        photos: Vec<PathBuf>,

        /// Extra information for the model, e.g. "bought 2021, never worn"
        #[arg(short, long)]
        context: Option<String>,

        /// Override the provider (google, openai, anthropic, xai, openrouter)
        #[arg(short, long)]
        provider: Option<String>,

        /// Override the model
        #[arg(short, long)]
        model: Option<String>,

        /// Open the crop window for every photo before analysing
        #[arg(long, default_value_t = false)]
        crop: bool,

        /// Rotate every photo by this many quarter turns clockwise
        #[arg(long, default_value_t = 0)]
        rotate: u8,
    },
    /// Crop a photo interactively
    Crop {
        photo: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Rotate a photo clockwise
    Rotate {
        photo: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Quarter turns
        #[arg(long, default_value_t = 1)]
        times: u8,
    },
    /// Downscale a photo to fit 1024x1024 and re-encode it as JPEG
    Normalize {
        photo: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Saved listings
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
    /// Show which providers have credentials
    Providers,
    /// Show or change settings
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },
    /// Show accumulated token usage and cost
    Usage,
}

#[derive(Subcommand, Debug)]
enum HistoryAction {
    /// List saved listings, newest first
    List,
    Show { id: String },
    /// Re-open a listing in the review loop
    Edit { id: String },
    Delete { id: String },
    /// Copy a listing's description to the clipboard
    Copy { id: String },
    /// Push queued changes and pull remote listings
    Sync,
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
    Show,
    /// Set provider, model, language, currency or prompt
    Set { key: String, value: String },
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup
    let _ = dotenvy::dotenv();
    init();
    init_tracing();
    let args = Args::parse();
    let interrupts = Interrupts::install();

    match args.command {
        Command::Analyze {
            photos,
            context,
            provider,
            model,
            crop,
            rotate,
        } => {
            let mut config = Config::load().context("Failed to load configuration")?;
            if let Some(provider) = provider {
                config.provider = Some(ProviderKind::from_str(&provider)?);
            }
            if model.is_some() {
                config.model = model;
            }
            let app = Snaplist::open(config, storage_paths()?).context("Failed to open snaplist")?;
            analyze(&app, &interrupts, &photos, context, crop, rotate).await
        }
        Command::Crop { photo, output } => {
            let app = open_app()?;
            let image = load_photo(&app, &photo).await?;
            match ui::run_crop_ui(&image)? {
                Some(cropped) => write_jpeg(&output, &cropped),
                None => {
                    println!("Crop cancelled");
                    Ok(())
                }
            }
        }
        Command::Rotate { photo, output, times } => {
            let app = open_app()?;
            let mut image = load_photo(&app, &photo).await?;
            image = rotate_times(&app, image, times).await?;
            write_jpeg(&output, &image)
        }
        Command::Normalize { photo, output } => {
            let app = open_app()?;
            let image = load_photo(&app, &photo).await?;
            write_jpeg(&output, &image)
        }
        Command::History { action } => history(&open_app()?, &interrupts, action).await,
        Command::Providers => {
            let app = open_app()?;
            let (selected, model) = app.selection();
            for status in app.provider_statuses() {
                let marker = if status.provider == selected { "*" } else { " " };
                let key = if status.has_key { "key set" } else { "no key" };
                println!(
                    "{} {:<11} {:<16} {}",
                    marker,
                    status.provider.id(),
                    status.provider.display_name(),
                    key
                );
            }
            println!("\nSelected model: {}", model);
            Ok(())
        }
        Command::Settings { action } => {
            let mut app = open_app()?;
            match action {
                None | Some(SettingsAction::Show) => {}
                Some(SettingsAction::Set { key, value }) => app.set_setting(&key, &value)?,
                Some(SettingsAction::Reset) => app.reset_settings(),
            }
            let settings = app.settings();
            println!("provider: {}", settings.provider.id());
            println!("model:    {}", settings.model);
            println!("language: {}", settings.language);
            println!("currency: {}", settings.currency);
            println!("prompt:\n{}", settings.prompt_template);
            Ok(())
        }
        Command::Usage => {
            let totals = open_app()?.usage_totals().await;
            println!("Runs:              {}", totals.runs);
            println!("Prompt tokens:     {}", totals.prompt_tokens);
            println!("Completion tokens: {}", totals.completion_tokens);
            println!("Total tokens:      {}", totals.total_tokens);
            println!("Cost (USD):        {:.4}", totals.cost_usd);
            Ok(())
        }
    }
}

/// Process-wide Ctrl+C routing.
///
/// While an analysis runs, Ctrl+C cancels it; otherwise the process exits
/// with status 130.
#[derive(Clone, Default)]
struct Interrupts {
    active: Arc<Mutex<Option<CancellationToken>>>,
}

impl Interrupts {
    fn install() -> Self {
        let interrupts = Self::default();
        let handler = interrupts.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if !handler.interrupt() {
                    eprintln!();
                    std::process::exit(130);
                }
                debug!("analysis cancelled from the keyboard");
            }
        });
        interrupts
    }

    fn slot(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Routes Ctrl+C to `token` until [`finish`](Self::finish).
    fn watch(&self, token: CancellationToken) {
        *self.slot() = Some(token);
    }

    fn finish(&self) {
        self.slot().take();
    }

    /// Cancels the watched token. Returns `false` when nothing is running.
    fn interrupt(&self) -> bool {
        match self.slot().take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("snaplist=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn storage_paths() -> Result<snaplist_core::StoragePaths> {
    snaplist_core::StoragePaths::platform().context("Failed to locate the data directory")
}

fn open_app() -> Result<Snaplist> {
    let config = Config::load().context("Failed to load configuration")?;
    Snaplist::open(config, storage_paths()?).context("Failed to open snaplist")
}

async fn load_photo(app: &Snaplist, path: &Path) -> Result<EncodedImage> {
    app.photos()
        .load_one(path, &CancellationToken::new())
        .await
        .with_context(|| format!("Failed to load {}", path.display()))
}

async fn rotate_times(app: &Snaplist, mut image: EncodedImage, times: u8) -> Result<EncodedImage> {
    let cancel = CancellationToken::new();
    for _ in 0..times % 4 {
        image = ImageProcessor::rotate90_bounded(image.bytes, app.config().decode_timeout, &cancel).await?;
    }
    Ok(image)
}

fn write_jpeg(path: &Path, image: &EncodedImage) -> Result<()> {
    std::fs::write(path, &image.bytes).with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote {} ({}x{})", path.display(), image.width, image.height);
    Ok(())
}

fn spinner(message: String) -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
            .template("{spinner:.green} {msg}")?,
    );
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    Ok(spinner)
}

async fn analyze(
    app: &Snaplist,
    interrupts: &Interrupts,
    paths: &[PathBuf],
    context: Option<String>,
    crop: bool,
    rotate: u8,
) -> Result<()> {
    let mut expanded = Vec::new();
    for path in paths {
        if path.is_dir() {
            expanded.extend(photos_in_dir(path).with_context(|| format!("Failed to list {}", path.display()))?);
        } else {
            expanded.push(path.clone());
        }
    }
    if expanded.is_empty() {
        bail!("No photos found");
    }
    let paths = expanded.as_slice();
    debug!(photos = paths.len(), crop, rotate, "starting analysis");

    let loading = spinner(format!("Loading {} photo(s)...", paths.len()))?;
    let loaded = app.photos().load(paths, &CancellationToken::new()).await;
    loading.finish_and_clear();
    let mut photos = loaded.context("Failed to load photos")?;

    if rotate % 4 != 0 {
        for photo in photos.iter_mut() {
            *photo = rotate_times(app, photo.clone(), rotate).await?;
        }
    }

    let mut session = ReviewSession::new(app.settings().currency.clone());
    for (index, photo) in photos.into_iter().enumerate() {
        let photo = if crop {
            match ui::run_crop_ui(&photo)? {
                Some(cropped) => cropped,
                None => {
                    println!("Photo {} kept uncropped", index + 1);
                    photo
                }
            }
        } else {
            photo
        };
        session.add_photo(photo.to_data_url())?;
    }

    // The session keeps its photos after a failure, so a retry reuses them.
    while session.phase() != ReviewPhase::Reviewing {
        let ticket = session.begin_analysis(context.clone())?;
        run_ticket(app, interrupts, &mut session, ticket).await?;
        if session.phase() != ReviewPhase::Reviewing && !wants_retry(&ask("Retry? [y/N] ")?) {
            bail!("Analysis did not produce a draft");
        }
    }
    review_loop(app, interrupts, &mut session).await
}

/// Reads one answer from stdin; end of input reads as an empty answer.
fn ask(question: &str) -> Result<String> {
    print!("{}", question);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(answer)
}

fn wants_retry(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes" | "j" | "ja")
}

/// Runs one ticket to completion; Ctrl+C cancels it.
async fn run_ticket(app: &Snaplist, interrupts: &Interrupts, session: &mut ReviewSession, ticket: Ticket) -> Result<()> {
    let (provider, model) = app.selection();
    let progress = spinner(format!("Analyzing with {} ({})...", provider.display_name(), model))?;

    interrupts.watch(ticket.cancel_token().clone());
    let outcome = app.analyze(&ticket).await;
    interrupts.finish();
    progress.finish_and_clear();

    session.complete(&ticket, outcome)?;
    if let Some(error) = session.error() {
        let kind = error.kind.map(|k| k.as_str()).unwrap_or("error");
        eprintln!("Analysis failed [{}]: {}", kind, error.message);
        if error.retryable {
            eprintln!("This may succeed if you try again.");
        }
    }
    Ok(())
}

fn print_draft(session: &ReviewSession) {
    let Some(draft) = session.draft() else {
        return;
    };
    let fields = &draft.fields;
    println!();
    println!("Description: {}", fields.description);
    match fields.price_new {
        Some(new) => println!("Price:       {} {} (new: {} {})", fields.price, draft.currency, new, draft.currency),
        None => println!("Price:       {} {}", fields.price, draft.currency),
    }
    for field in ItemField::ALL {
        let value = fields.field(field);
        let value = if value.trim().is_empty() { "-" } else { value };
        println!("{:<12} {}", format!("{}:", field.key()), value);
    }
    for link in &fields.similar_links {
        println!("Similar:     {}", link);
    }
    let missing = draft.missing_fields();
    if !missing.is_empty() {
        let names: Vec<&str> = missing.iter().map(|f| f.key()).collect();
        println!("Missing:     {}", names.join(", "));
    }
}

const REVIEW_HELP: &str = "Commands:
  set <field> <value>   edit brand, type, color, size, material, condition, style or description
  price <n>             set the price
  pricenew <n|->        set or clear the new price
  auto                  regenerate the description from the details
  reestimate            ask the model again using the reviewed details
  save                  save the listing
  discard               throw the draft away";

async fn review_loop(app: &Snaplist, interrupts: &Interrupts, session: &mut ReviewSession) -> Result<()> {
    print_draft(session);
    println!("\n{}", REVIEW_HELP);

    loop {
        print!("\n> ");
        io::stdout().flush()?;
        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            session.discard();
            println!("Draft discarded");
            return Ok(());
        }
        let input = input.trim();
        let (command, rest) = input.split_once(' ').unwrap_or((input, ""));
        let rest = rest.trim();

        let outcome = match command {
            "" => continue,
            "help" => {
                println!("{}", REVIEW_HELP);
                continue;
            }
            "set" => set_field(session, rest),
            "price" => parse_price(rest).and_then(|price| {
                session.draft_mut()?.set_price(price);
                Ok(())
            }),
            "pricenew" => {
                let value = if rest == "-" { Ok(None) } else { parse_price(rest).map(Some) };
                value.and_then(|price| {
                    session.draft_mut()?.set_price_new(price);
                    Ok(())
                })
            }
            "auto" => session.draft_mut().map(|d| d.regenerate_description()).map_err(Into::into),
            "reestimate" => match session.begin_reestimate() {
                Ok(ticket) => run_ticket(app, interrupts, session, ticket).await,
                Err(e) => Err(e.into()),
            },
            "save" => {
                let saving = spinner("Saving...".to_string())?;
                let saved = app.save(session).await;
                saving.finish_and_clear();
                match saved {
                    Ok(item) => {
                        println!("Saved listing {}", item.id);
                        return Ok(());
                    }
                    Err(e) => Err(anyhow!(e).context("Failed to save; the draft is kept")),
                }
            }
            "discard" => {
                session.discard();
                println!("Draft discarded");
                return Ok(());
            }
            other => Err(anyhow!("Unknown command '{}'. Type 'help'.", other)),
        };

        match outcome {
            Ok(()) => print_draft(session),
            Err(e) => eprintln!("{:#}", e),
        }
    }
}

fn set_field(session: &mut ReviewSession, args: &str) -> Result<()> {
    let (key, value) = args
        .split_once(' ')
        .ok_or_else(|| anyhow!("Usage: set <field> <value>"))?;
    let draft = session.draft_mut()?;
    if key.eq_ignore_ascii_case("description") {
        draft.set_description(value.trim());
        return Ok(());
    }
    let field = ItemField::from_key(key).ok_or_else(|| anyhow!("Unknown field '{}'", key))?;
    draft.set_field(field, value.trim());
    Ok(())
}

fn parse_price(value: &str) -> Result<f64> {
    let price: f64 = value
        .replace(',', ".")
        .parse()
        .with_context(|| format!("'{}' is not a price", value))?;
    if !price.is_finite() || price < 0.0 {
        bail!("Price must be a positive number");
    }
    Ok(price)
}

fn print_item(item: &ListingItem) {
    println!("Id:          {}", item.id);
    println!("Description: {}", item.description);
    match item.price_new {
        Some(new) => println!("Price:       {} {} (new: {} {})", item.price, item.currency, new, item.currency),
        None => println!("Price:       {} {}", item.price, item.currency),
    }
    let result = item.to_result();
    for field in ItemField::ALL {
        let value = result.field(field);
        if !value.trim().is_empty() {
            println!("{:<12} {}", format!("{}:", field.key()), value);
        }
    }
    for link in &item.similar_links {
        println!("Similar:     {}", link);
    }
    println!("Photos:      {}", item.photos.len());
}

async fn find_item(app: &Snaplist, id: &str) -> Result<ListingItem> {
    app.find(id)
        .await
        .context("Failed to read history")?
        .ok_or_else(|| anyhow!("No listing with id {}", id))
}

async fn history(app: &Snaplist, interrupts: &Interrupts, action: HistoryAction) -> Result<()> {
    match action {
        HistoryAction::List => {
            let items = app.history().await.context("Failed to read history")?;
            if items.is_empty() {
                println!("No saved listings");
            }
            for item in items {
                println!("{}  {:>8} {}  {}", item.id, item.price, item.currency, item.description);
            }
            let pending = app.pending_sync().await;
            if pending > 0 {
                println!("\n{} change(s) waiting to sync", pending);
            }
        }
        HistoryAction::Show { id } => print_item(&find_item(app, &id).await?),
        HistoryAction::Edit { id } => {
            let item = find_item(app, &id).await?;
            let mut session = ReviewSession::edit_existing(&item);
            review_loop(app, interrupts, &mut session).await?;
        }
        HistoryAction::Delete { id } => {
            app.delete(&id).await.context("Failed to delete listing")?;
            println!("Deleted {}", id);
        }
        HistoryAction::Copy { id } => {
            let item = find_item(app, &id).await?;
            match Clipboard::new() {
                Ok(mut clipboard) => {
                    if let Err(e) = clipboard.set_text(item.description.clone()) {
                        eprintln!("Warning: Failed to copy to clipboard: {}", e);
                    } else {
                        println!("(Copied to clipboard)");
                    }
                }
                Err(e) => eprintln!("Warning: Could not access clipboard: {}", e),
            }
        }
        HistoryAction::Sync => {
            let report = app.sync().await.context("Sync failed")?;
            println!("Pulled {} listing(s); {} change(s) still pending", report.pulled, report.pending);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_answers() {
        for yes in ["y", "Y\n", " yes ", "ja"] {
            assert!(wants_retry(yes), "{yes:?}");
        }
        for no in ["", "\n", "n", "no", "maybe"] {
            assert!(!wants_retry(no), "{no:?}");
        }
    }

    #[test]
    fn interrupt_cancels_only_the_watched_analysis() {
        let interrupts = Interrupts::default();
        assert!(!interrupts.interrupt());

        let token = CancellationToken::new();
        interrupts.watch(token.clone());
        assert!(interrupts.interrupt());
        assert!(token.is_cancelled());
        // a second Ctrl+C with nothing running exits
        assert!(!interrupts.interrupt());
    }

    #[test]
    fn finished_analysis_is_not_cancelled() {
        let interrupts = Interrupts::default();
        let token = CancellationToken::new();
        interrupts.watch(token.clone());
        interrupts.finish();
        assert!(!interrupts.interrupt());
        assert!(!token.is_cancelled());
    }

    #[test]
    fn cli_arguments_parse() {
        let args = Args::try_parse_from(["snaplist", "analyze", "a.jpg", "b.jpg", "--crop", "--rotate", "2"]).unwrap();
        match args.command {
            Command::Analyze { photos, crop, rotate, .. } => {
                assert_eq!(photos.len(), 2);
                assert!(crop);
                assert_eq!(rotate, 2);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
