use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;
use serde_json::{json, Value};
use strvct_kv::{FileFolder, Folder, KvConfig, KvValue};
use strvct_store::{ObjectPool, TypeRegistry};
use strvct_types::{Pid, Record};

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let folder = open_folder(&cli).await?;
    let format = cli.format;
    match cli.command {
        Command::Keys => cmd_keys(&folder, format).await,
        Command::Get(args) => cmd_get(&folder, &args.pid, format).await,
        Command::Count => cmd_count(&folder, format).await,
        Command::Refs(args) => cmd_refs(&folder, &args.pid, format).await,
        Command::Reachable(args) => cmd_reachable(folder, args, format).await,
        Command::Rm(args) => cmd_rm(folder, &args.pid, format).await,
        Command::Compact => cmd_compact(&folder, format).await,
    }
}

async fn open_folder(cli: &Cli) -> anyhow::Result<Arc<FileFolder>> {
    let mut config = match &cli.config {
        Some(path) => KvConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => KvConfig::default(),
    };
    if let Some(name) = &cli.folder {
        config.folder = name.clone();
    }
    let folder = Arc::new(FileFolder::from_config(&cli.dir, &config));
    folder
        .open()
        .await
        .with_context(|| format!("opening {}", folder.path().display()))?;
    Ok(folder)
}

async fn open_pool(folder: Arc<FileFolder>) -> anyhow::Result<ObjectPool> {
    let mut pool = ObjectPool::new(folder, TypeRegistry::with_builtins());
    pool.open().await?;
    Ok(pool)
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_pids(label: &str, pids: &BTreeSet<Pid>) {
    println!("{} {}", pids.len().to_string().bold(), label);
    for pid in pids {
        println!("  {}", pid.as_str().yellow());
    }
}

async fn cmd_keys(folder: &FileFolder, format: OutputFormat) -> anyhow::Result<()> {
    let keys = folder.all_keys().await?;
    match format {
        OutputFormat::Json => print_json(&json!(keys)),
        OutputFormat::Text => {
            for key in &keys {
                println!("{}", key.yellow());
            }
            Ok(())
        }
    }
}

async fn cmd_get(folder: &FileFolder, key: &str, format: OutputFormat) -> anyhow::Result<()> {
    let Some(value) = folder.at(key).await? else {
        bail!("no record under {key}");
    };
    let text = match &value {
        KvValue::Text(text) => text,
        KvValue::Binary(bytes) => {
            match format {
                OutputFormat::Json => print_json(&json!({ "key": key, "binary_len": bytes.len() }))?,
                OutputFormat::Text => println!("{} binary, {} bytes", key.yellow(), bytes.len()),
            }
            return Ok(());
        }
    };
    match format {
        OutputFormat::Json => {
            let parsed: Value = serde_json::from_str(text).unwrap_or_else(|_| json!(text));
            print_json(&parsed)
        }
        OutputFormat::Text => {
            match Record::from_json_str(text) {
                Ok(record) => {
                    println!("{} {}", key.yellow().bold(), record.type_name().cyan());
                    match &record {
                        Record::Object(object) => {
                            for (slot, value) in &object.entries {
                                println!("  {}: {}", slot.bold(), value);
                            }
                        }
                        Record::Blob(blob) => {
                            println!("  dataUrl: {} chars", blob.data_url.len());
                        }
                    }
                }
                Err(_) => println!("{} = {}", key.yellow().bold(), text),
            }
            Ok(())
        }
    }
}

async fn cmd_count(folder: &FileFolder, format: OutputFormat) -> anyhow::Result<()> {
    let count = folder.count().await?;
    match format {
        OutputFormat::Json => print_json(&json!({ "count": count })),
        OutputFormat::Text => {
            println!("{} keys in {}", count.to_string().bold(), folder.name().cyan());
            Ok(())
        }
    }
}

async fn cmd_refs(folder: &FileFolder, key: &str, format: OutputFormat) -> anyhow::Result<()> {
    let Some(value) = folder.at(key).await? else {
        bail!("no record under {key}");
    };
    let text = value
        .as_text()
        .with_context(|| format!("{key} holds binary data, not a record"))?;
    let record = Record::from_json_str(text)?;
    let mut pids = BTreeSet::new();
    record.refs_pids(&mut pids);
    match format {
        OutputFormat::Json => print_json(&json!(pids)),
        OutputFormat::Text => {
            print_pids("references", &pids);
            Ok(())
        }
    }
}

async fn cmd_reachable(
    folder: Arc<FileFolder>,
    args: ReachableArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let pool = open_pool(folder).await?;
    let reached = pool.reachable_pids()?;
    let unreachable: BTreeSet<Pid> = if args.unreachable {
        pool.pids()?
            .into_iter()
            .filter(|pid| !reached.contains(pid))
            .collect()
    } else {
        BTreeSet::new()
    };
    match format {
        OutputFormat::Json => {
            let mut out = json!({ "reachable": reached });
            if args.unreachable {
                out["unreachable"] = json!(unreachable);
            }
            print_json(&out)
        }
        OutputFormat::Text => {
            if pool.root_pid()?.is_none() {
                println!("{}", "no root object".dimmed());
                return Ok(());
            }
            print_pids("reachable", &reached);
            if args.unreachable {
                print_pids("unreachable", &unreachable);
            }
            Ok(())
        }
    }
}

async fn cmd_rm(folder: Arc<FileFolder>, key: &str, format: OutputFormat) -> anyhow::Result<()> {
    let mut pool = open_pool(folder).await?;
    let pid = Pid::new(key)?;
    if !pool.remove(&pid)? {
        bail!("no record under {key}");
    }
    pool.commit().await?;
    match format {
        OutputFormat::Json => print_json(&json!({ "removed": key })),
        OutputFormat::Text => {
            println!("{} Removed {}", "✓".green().bold(), key.yellow());
            Ok(())
        }
    }
}

async fn cmd_compact(folder: &FileFolder, format: OutputFormat) -> anyhow::Result<()> {
    let before = std::fs::metadata(folder.path()).map(|m| m.len()).unwrap_or(0);
    let after = folder.compact().await?;
    match format {
        OutputFormat::Json => print_json(&json!({ "before": before, "after": after })),
        OutputFormat::Text => {
            println!(
                "{} Compacted {}: {} -> {} bytes",
                "✓".green().bold(),
                folder.name().cyan(),
                before,
                after
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use strvct_kv::SyncMode;
    use strvct_store::{ObjectRef, StorableNode};

    async fn seed(dir: &std::path::Path) -> (Pid, Pid) {
        let folder = Arc::new(FileFolder::new(dir, "objects", SyncMode::EveryWrite));
        let mut pool = open_pool(folder).await.unwrap();
        let root = pool
            .root_or_insert_with(|| ObjectRef::new(StorableNode::new("root")))
            .unwrap();
        let child = ObjectRef::new(StorableNode::new("child"));
        StorableNode::add_subnode(&root, child.clone()).unwrap();
        pool.commit().await.unwrap();
        (root.pid().cloned().unwrap(), child.pid().cloned().unwrap())
    }

    fn cli(dir: &std::path::Path, args: &[&str]) -> Cli {
        let mut argv = vec!["strvct", "--dir", dir.to_str().unwrap()];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[tokio::test]
    async fn read_commands_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let (root, _) = seed(dir.path()).await;
        for args in [
            vec!["keys"],
            vec!["count", "--format", "json"],
            vec!["get", root.as_str()],
            vec!["refs", root.as_str(), "--format", "json"],
            vec!["reachable", "--unreachable"],
        ] {
            run_command(cli(dir.path(), &args)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn get_missing_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path()).await;
        assert!(run_command(cli(dir.path(), &["get", "nope"])).await.is_err());
    }

    #[tokio::test]
    async fn rm_then_compact() {
        let dir = tempfile::tempdir().unwrap();
        let (_, child) = seed(dir.path()).await;
        run_command(cli(dir.path(), &["rm", child.as_str()])).await.unwrap();
        run_command(cli(dir.path(), &["compact"])).await.unwrap();

        let folder = FileFolder::new(dir.path(), "objects", SyncMode::default());
        folder.open().await.unwrap();
        assert!(!folder.has_key(child.as_str()).await.unwrap());
        // Root record and the root key remain.
        assert_eq!(folder.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn folder_flag_selects_journal() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path()).await;
        run_command(cli(dir.path(), &["count", "--folder", "other"])).await.unwrap();
        assert!(dir.path().join("other.journal").exists());
    }
}
