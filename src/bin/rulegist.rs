// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use rulegist::{
    catalog::Catalog,
    config::{resolve_token, save_token, Settings, Token, TokenSource},
    display::{catalog_table, rule_set_table},
    manifest::Manifest,
    remote::GistClient,
    store::{resolve_work_dir, RuleStore, RULES_DIR},
    sync::{DownloadOptions, SyncError, Syncer, Target, UploadOptions, UploadOutcome, STAGING_DIR},
};

use anyhow::{anyhow, Result};
use chrono::{Months, Utc};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Confirm, Password};
use std::process::exit;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "rulegist [options] <rulegist-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        let settings = Settings::from_env()?;
        match self.command {
            Command::Auth(opts) => run_auth(&settings, opts),
            Command::Init => run_init(),
            Command::Upload(opts) => run_upload(&settings, opts),
            Command::Download(opts) => run_download(&settings, opts),
            Command::List(opts) => run_list(&settings, opts),
            Command::Delete(opts) => run_delete(&settings, opts),
            Command::Store(opts) => run_store(&settings, opts),
            Command::Version => {
                println!("rulegist {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Store GitHub token for later use.
    #[command(override_usage = "rulegist auth [options]")]
    Auth(AuthOptions),

    /// Create rules directory with sample rule files.
    #[command(override_usage = "rulegist init")]
    Init,

    /// Upload local rule files as a rule set.
    #[command(override_usage = "rulegist upload [options] <title>")]
    Upload(UploadCmdOptions),

    /// Download rule set into local rules directory.
    #[command(override_usage = "rulegist download [options] [<title>]")]
    Download(DownloadCmdOptions),

    /// List rule sets modified within the last month.
    #[command(override_usage = "rulegist list [options]")]
    List(ListOptions),

    /// Delete rule set.
    #[command(override_usage = "rulegist delete [options] <title>")]
    Delete(DeleteOptions),

    /// Browse and download rule sets of the public catalog.
    #[command(override_usage = "rulegist store <store-command>")]
    Store(StoreOptions),

    /// Show version information.
    #[command(override_usage = "rulegist version")]
    Version,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct AuthOptions {
    /// Token to store, prompted for when omitted.
    #[arg(short, long, value_name = "token")]
    pub token: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct UploadCmdOptions {
    /// Title of rule set to upload under.
    #[arg(required = true, value_name = "title")]
    pub title: String,

    /// Replace existing rule set with the same title.
    #[arg(short, long)]
    pub force: bool,

    /// Show what would be uploaded without uploading.
    #[arg(short, long)]
    pub preview: bool,

    /// Make new rule set public.
    #[arg(long)]
    pub public: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DownloadCmdOptions {
    /// Title of rule set to download.
    #[arg(group = "target", value_name = "title")]
    pub title: Option<String>,

    /// Id of rule set to download, works without a token for public ones.
    #[arg(group = "target", long, value_name = "id")]
    pub id: Option<String>,

    /// Overwrite existing local rule files.
    #[arg(short, long)]
    pub force: bool,

    /// Fail if more than one rule set has the title.
    #[arg(long)]
    pub strict: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ListOptions {
    /// Include revision count of each rule set.
    #[arg(short, long)]
    pub detail: bool,

    /// List public catalog instead.
    #[arg(short, long)]
    pub store: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DeleteOptions {
    /// Title of rule set to delete.
    #[arg(required = true, value_name = "title")]
    pub title: String,

    /// Delete without asking for confirmation.
    #[arg(short, long)]
    pub force: bool,

    /// Fail if more than one rule set has the title.
    #[arg(long)]
    pub strict: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct StoreOptions {
    #[command(subcommand)]
    pub command: StoreCommand,
}

#[derive(Debug, Clone, Subcommand)]
enum StoreCommand {
    /// List public catalog.
    #[command(override_usage = "rulegist store list")]
    List,

    /// Download rule set of public catalog by name.
    #[command(override_usage = "rulegist store download [options] <name>")]
    Download(StoreDownloadOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct StoreDownloadOptions {
    /// Name of catalog entry.
    #[arg(required = true, value_name = "name")]
    pub name: String,

    /// Overwrite existing local rule files.
    #[arg(short, long)]
    pub force: bool,
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run()
}

fn run_auth(settings: &Settings, opts: AuthOptions) -> Result<()> {
    let token = match opts.token {
        Some(token) => token,
        None => prompt_token()?,
    };

    save_token(settings, token)?;
    info!("token stored, future commands will use it");

    Ok(())
}

fn run_init() -> Result<()> {
    let store = RuleStore::from_work_dir()?;
    let created = store
        .init_samples()?
        .into_iter()
        .filter(|(_, fresh)| *fresh)
        .count();
    info!("{created} sample rule files ready in {}", store.root().display());

    Ok(())
}

fn run_upload(settings: &Settings, opts: UploadCmdOptions) -> Result<()> {
    let syncer = syncer(settings, Some(require_token(settings)?))?;
    let options = UploadOptions {
        force: opts.force,
        preview: opts.preview,
        public: opts.public,
    };

    let outcome = match syncer.upload(&opts.title, options) {
        Err(error) if error.is_no_rules_found() => {
            warn!("{error}");
            warn!("create rule files under {RULES_DIR}, or run `rulegist init` for samples");
            return Ok(());
        }
        result => result?,
    };

    match outcome {
        UploadOutcome::Preview(manifest) => print_preview(&manifest)?,
        UploadOutcome::Created(id) => info!("created rule set {:?} ({id})", opts.title),
        UploadOutcome::Updated(id) => info!("replaced rule set {:?} ({id})", opts.title),
    }

    Ok(())
}

fn run_download(settings: &Settings, opts: DownloadCmdOptions) -> Result<()> {
    let (target, token) = match (opts.title, opts.id) {
        (_, Some(id)) => (Target::Id(id), resolve_token(settings)?),
        (Some(title), None) => (Target::Title(title), Some(require_token(settings)?)),
        (None, None) => return Err(anyhow!("provide a rule set title, or an id through --id")),
    };

    let options = DownloadOptions {
        force: opts.force,
        strict: opts.strict,
    };
    download(&syncer(settings, token)?, &target, options)
}

fn run_list(settings: &Settings, opts: ListOptions) -> Result<()> {
    if opts.store {
        return print_catalog(settings);
    }

    let token = require_token(settings)?;
    println!("GitHub token: loaded from {}", token.source());

    let since = Utc::now().checked_sub_months(Months::new(1));
    let listing = syncer(settings, Some(token))?.list(since, opts.detail)?;
    if listing.is_empty() {
        info!("no rule sets modified within the last month");
        return Ok(());
    }

    print!("{}", rule_set_table(&listing, opts.detail));
    Ok(())
}

fn run_delete(settings: &Settings, opts: DeleteOptions) -> Result<()> {
    let syncer = syncer(settings, Some(require_token(settings)?))?;
    let rule_set = syncer.find(&opts.title, opts.strict)?;

    if !opts.force {
        let confirmed = Confirm::new(&format!("Delete rule set {:?} ({})?", opts.title, rule_set.id))
            .with_default(false)
            .prompt()?;
        if !confirmed {
            info!("nothing deleted");
            return Ok(());
        }
    }

    syncer.delete(&rule_set.id)?;
    Ok(())
}

fn run_store(settings: &Settings, opts: StoreOptions) -> Result<()> {
    match opts.command {
        StoreCommand::List => print_catalog(settings),
        StoreCommand::Download(opts) => {
            let remote = GistClient::new(settings, None)?;
            let entry = Catalog::entry(
                &remote,
                &settings.catalog_url,
                settings.catalog_cache(),
                &opts.name,
            )?;
            info!("downloading {:?} ({})", entry.name, entry.gist_id);

            let options = DownloadOptions {
                force: opts.force,
                strict: false,
            };
            let target = Target::Id(entry.gist_id.clone());
            download(&syncer(settings, None)?, &target, options)
        }
    }
}

fn download(syncer: &Syncer, target: &Target, options: DownloadOptions) -> Result<()> {
    let bar = progress_bar()?;
    let report = match syncer.download(target, options, &bar) {
        Err(SyncError::LocalConflict { paths }) => {
            bar.finish_and_clear();
            for path in &paths {
                warn!("already exists: {path}");
            }
            return Err(SyncError::LocalConflict { paths }.into());
        }
        result => {
            bar.finish_and_clear();
            result?
        }
    };

    info!(
        "downloaded {} rule files of {:?} ({})",
        report.files.len(),
        report.title,
        report.id
    );

    Ok(())
}

fn syncer(settings: &Settings, token: Option<Token>) -> Result<Syncer> {
    let work_dir = resolve_work_dir()?;
    let store = RuleStore::open(work_dir.join(RULES_DIR));
    let remote = GistClient::new(settings, token)?;

    Ok(Syncer::new(remote, store, work_dir.join(STAGING_DIR)))
}

fn require_token(settings: &Settings) -> Result<Token> {
    match resolve_token(settings)? {
        Some(token) => Ok(token),
        None => {
            let secret = prompt_token()?;
            let secret = secret.trim();
            if secret.is_empty() {
                return Err(anyhow!("no GitHub token given, run `rulegist auth` to set one"));
            }

            Ok(Token::new(secret, TokenSource::Prompt))
        }
    }
}

fn prompt_token() -> Result<String> {
    let token = Password::new("GitHub token:")
        .without_confirmation()
        .prompt()?;

    Ok(token)
}

fn progress_bar() -> Result<ProgressBar> {
    let style = ProgressStyle::with_template(
        "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}] {pos}/{len}",
    )?
    .progress_chars("-Cco.");

    Ok(ProgressBar::new(0).with_style(style))
}

fn refresh_catalog(settings: &Settings) -> Result<Catalog> {
    let remote = GistClient::new(settings, None)?;
    Ok(Catalog::refresh(&remote, &settings.catalog_url, settings.catalog_cache())?)
}

fn print_catalog(settings: &Settings) -> Result<()> {
    let catalog = refresh_catalog(settings)?;
    if catalog.is_empty() {
        info!("public catalog has no entries");
        return Ok(());
    }

    print!("{}", catalog_table(&catalog));
    Ok(())
}

fn print_preview(manifest: &Manifest) -> Result<()> {
    println!(
        "{} rule files, {} bytes total:",
        manifest.files.len(),
        manifest.total_size()
    );
    for entry in &manifest.files {
        println!("  {} -> {} ({} bytes)", entry.path, entry.remote_name, entry.size);
    }
    println!("{}", serde_json::to_string_pretty(&manifest.structure)?);

    Ok(())
}
