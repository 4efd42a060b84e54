use std::path::{Path, PathBuf};
use anyhow::{bail, Context, Result};
use colored::Colorize;
use satchel::archive::{hash_file, verify_file, Archiver};
use satchel::config::Settings;
use satchel::fetch::HttpFetcher;
use satchel::global::cache::RegistryCache;
use satchel::global::dirs::{get_install_dir, get_lock_file, get_settings_file};
use satchel::installer::{Installer, UpdateOutcome, UpdateResult};
use satchel::lock::LockStore;
use satchel::registry::ToolType;
use satchel::util::{compare_versions, parse_tool_ref};
use crate::cli::{CacheAction, SatchelCommand, CLI};

/// Settings for one invocation: `satchel.toml` with CLI overrides applied.
pub struct Session {
    root: PathBuf,
    settings: Settings,
}

impl Session {
    fn load(cli: &CLI) -> Result<Self> {
        let root = std::env::current_dir()?;
        let mut settings = Settings::load_or_default(get_settings_file(&root))?;
        if let Some(dir) = &cli.cache_dir {
            settings.cache_dir = Some(dir.clone());
        }
        match cli.ttl {
            Some(ttl) if ttl > 0 => settings.cache_ttl_secs = ttl,
            Some(ttl) => tracing::warn!(ttl, "ignoring non-positive --ttl"),
            None => {}
        }
        Ok(Self { root, settings })
    }

    fn cache(&self) -> Result<RegistryCache> {
        let dir = self.settings.resolve_cache_dir()?;
        Ok(RegistryCache::new(dir, self.settings.cache_ttl())?)
    }

    fn archiver(&self) -> Result<Archiver> {
        Ok(Archiver::with_limits(get_install_dir(&self.root), self.settings.archive)?)
    }

    fn installer(&self) -> Result<Installer<HttpFetcher>> {
        let lock_path = get_lock_file(&self.root);
        if !lock_path.exists() {
            bail!("satchel-lock.json not found. Run `satchel init` to create one.")
        }
        Ok(Installer::new(
            HttpFetcher::new(&self.settings.registry_url)?,
            self.archiver()?,
            self.cache()?,
            LockStore::new(lock_path),
        ))
    }
}

pub fn execute(cli: CLI) -> Result<()> {
    let ctx = Session::load(&cli)?;
    match cli.command {
        SatchelCommand::Init => execute_init(&ctx),
        SatchelCommand::Install { tool, tool_type } => execute_install(&ctx, &tool, tool_type),
        SatchelCommand::Uninstall { name } => execute_uninstall(&ctx, &name),
        SatchelCommand::List { long } => execute_list(&ctx, long),
        SatchelCommand::Outdated => execute_outdated(&ctx),
        SatchelCommand::Update { name } => execute_update(&ctx, name),
        SatchelCommand::Search { query, refresh } => execute_search(&ctx, &query, refresh),
        SatchelCommand::Cache { action } => execute_cache(&ctx, action),
        SatchelCommand::Pack { dir, archive } => execute_pack(&ctx, &dir, &archive),
        SatchelCommand::Hash { file } => {
            println!("{}", hash_file(&file)?);
            Ok(())
        }
        SatchelCommand::Verify { file, digest } => execute_verify(&file, &digest),
    }
}

pub fn execute_init(ctx: &Session) -> Result<()> {
    std::fs::create_dir_all(get_install_dir(&ctx.root))?;
    let settings_path = get_settings_file(&ctx.root);
    if !settings_path.exists() {
        ctx.settings.save(&settings_path)?;
    }
    LockStore::init(get_lock_file(&ctx.root), &ctx.settings.registry_url)?;
    println!("{} satchel project in {}", "Initialized".green(), ctx.root.display());
    Ok(())
}

pub fn execute_install(ctx: &Session, tool: &str, tool_type: Option<ToolType>) -> Result<()> {
    let (name, version) = parse_tool_ref(tool)?;
    let installer = ctx.installer()?;
    let report = installer
        .install_with(&name, version.as_deref(), tool_type)
        .with_context(|| format!("failed to install {tool}"))?;
    println!(
        "{} {}@{} ({}) to {}",
        "Installed".green(),
        report.name,
        report.version,
        report.tool_type,
        report.path.display()
    );
    Ok(())
}

pub fn execute_uninstall(ctx: &Session, name: &str) -> Result<()> {
    let removed = ctx.installer()?.uninstall(name)?;
    println!("{} {}@{}", "Removed".yellow(), name, removed.version);
    Ok(())
}

pub fn execute_list(ctx: &Session, long: bool) -> Result<()> {
    let installer = ctx.installer()?;
    let tools = installer.list()?;
    if tools.is_empty() {
        println!("No tools installed");
        return Ok(());
    }
    for (name, record) in &tools {
        println!("{}@{} ({})", name, record.version, record.tool_type);
        if long {
            println!("   installed at: {}", record.installed_at.to_rfc3339());
            println!("   source: {}", record.source);
            println!("   integrity: {}", record.integrity);
        }
        if !installer.is_installed(name) {
            println!("   {}", "files missing".red());
        }
    }
    Ok(())
}

pub fn execute_outdated(ctx: &Session) -> Result<()> {
    let outdated = ctx.installer()?.check_outdated()?;
    if outdated.is_empty() {
        println!("All tools are up to date");
        return Ok(());
    }
    for tool in outdated {
        println!(
            "{} ({}): {} -> {}",
            tool.name,
            tool.tool_type,
            tool.installed_version,
            tool.latest_version.green()
        );
    }
    Ok(())
}

fn print_update(result: &UpdateResult) {
    let status = match result.outcome {
        UpdateOutcome::Updated => "Updated".green(),
        UpdateOutcome::Skipped => "Skipped".normal(),
        UpdateOutcome::Failed => "Failed".red(),
    };
    println!("{} {}: {}", status, result.name, result.message);
}

pub fn execute_update(ctx: &Session, name: Option<String>) -> Result<()> {
    let installer = ctx.installer()?;
    match name {
        Some(name) => {
            print_update(&installer.update(&name)?);
            Ok(())
        }
        None => {
            let (results, errors) = installer.update_all()?;
            if results.is_empty() {
                println!("All tools are up to date");
            }
            results.iter().for_each(print_update);
            if !errors.is_empty() {
                bail!("{} of {} updates failed", errors.len(), results.len());
            }
            Ok(())
        }
    }
}

pub fn execute_search(ctx: &Session, query: &str, refresh: bool) -> Result<()> {
    let registry = ctx.installer()?.registry(refresh)?;
    let mut found = registry.search(query);
    if found.is_empty() {
        println!("No tools matching '{query}'");
        return Ok(());
    }
    found.sort_by(|a, b| a.name.cmp(&b.name).then(compare_versions(&b.version, &a.version)));
    for tool in found {
        println!("{}@{} ({})", tool.name.bold(), tool.version, tool.tool_type);
        if !tool.description.is_empty() {
            println!("  {}", tool.description);
        }
    }
    Ok(())
}

pub fn execute_cache(ctx: &Session, action: CacheAction) -> Result<()> {
    let cache = ctx.cache()?;
    match action {
        CacheAction::Status => match cache.status()? {
            Some(status) => {
                let state = if status.expired { "expired".red() } else { "valid".green() };
                println!("registry cache: {state}");
                println!("  cached at:  {}", status.metadata.cached_at.to_rfc3339());
                println!("  expires at: {}", status.metadata.expires_at.to_rfc3339());
                println!("  ttl:        {}s", status.metadata.ttl().num_seconds());
            }
            None => println!("registry cache: {}", "empty".yellow()),
        },
        CacheAction::Invalidate => {
            cache.invalidate()?;
            println!("{} registry cache", "Invalidated".yellow());
        }
        CacheAction::Clear => {
            cache.clear()?;
            println!("{} {}", "Cleared".yellow(), cache.dir().display());
        }
    }
    Ok(())
}

pub fn execute_pack(ctx: &Session, dir: &Path, archive: &Path) -> Result<()> {
    let archiver = Archiver::with_limits(&ctx.root, ctx.settings.archive)?;
    let entries = archiver.create(dir, archive)?;
    println!("{} {} entries into {}", "Packed".green(), entries, archive.display());
    println!("sha256: {}", hash_file(archive)?);
    Ok(())
}

pub fn execute_verify(file: &Path, digest: &str) -> Result<()> {
    verify_file(file, digest)?;
    println!("{} {}", "OK".green(), file.display());
    Ok(())
}
