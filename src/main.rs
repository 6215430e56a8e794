use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;

use docx_editor::config::{init_default_config, EditorSettings};
use docx_editor::docx::comments::{anchor_ids, check_symmetry, comment_ids};
use docx_editor::docx::images::extract_images;
use docx_editor::docx::package::{verify_archive, DocxPackage, COMMENTS_PART, DOCUMENT_PART};
use docx_editor::docx::parse::parse_document;
use docx_editor::service::{AccessPolicy, DocumentService};
use docx_editor::store::MemoryStore;
use docx_editor::sweep::{sweep_due, Sweeper};
use docx_editor::transaction;

#[derive(Parser, Debug)]
#[command(name = "docx-editor")]
#[command(about = "Paragraph and comment surgery on .docx files", long_about = None)]
struct Args {
    /// Config file path (default: search for docx-editor.toml upwards)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print numbered paragraphs and anchored comments as JSON
    Parse {
        #[arg(value_name = "DOCX")]
        input: PathBuf,
    },
    /// Replace the text of paragraph N
    Edit {
        #[arg(value_name = "DOCX")]
        input: PathBuf,
        paragraph: usize,
        text: String,
    },
    /// Insert a paragraph (appended unless --position is given)
    Insert {
        #[arg(value_name = "DOCX")]
        input: PathBuf,
        text: String,
        #[arg(long)]
        position: Option<usize>,
    },
    /// Delete paragraph N and the comments anchored in it
    Delete {
        #[arg(value_name = "DOCX")]
        input: PathBuf,
        paragraph: usize,
    },
    /// Anchor a new comment to paragraph N
    CommentAdd {
        #[arg(value_name = "DOCX")]
        input: PathBuf,
        paragraph: usize,
        text: String,
        /// Default: comments.default_author from config
        #[arg(long)]
        author: Option<String>,
    },
    /// Remove a comment and its anchors
    CommentDelete {
        #[arg(value_name = "DOCX")]
        input: PathBuf,
        id: u32,
    },
    /// Copy embedded images into DIR
    Images {
        #[arg(value_name = "DOCX")]
        input: PathBuf,
        #[arg(value_name = "DIR")]
        dest: PathBuf,
    },
    /// Verify archive integrity and comment anchors
    Check {
        #[arg(value_name = "DOCX")]
        input: PathBuf,
    },
    /// Rewrite every XML part with Word-compatible formatting
    Format {
        #[arg(value_name = "DOCX")]
        input: PathBuf,
    },
    /// Write a default docx-editor.toml, then exit
    InitConfig {
        /// Directory to write the config file (default: current directory)
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Store a document and index it into a JSON metadata store
    Upload {
        #[arg(value_name = "DOCX")]
        input: PathBuf,
        #[arg(long, value_name = "JSON")]
        store: PathBuf,
        #[arg(long, value_name = "DIR")]
        media_root: PathBuf,
        #[arg(long, value_enum, default_value = "read-write")]
        policy: PolicyArg,
    },
    /// Copy a stored document to DIR as edited_<filename>
    Export {
        id: u64,
        #[arg(long, value_name = "JSON")]
        store: PathBuf,
        #[arg(long, value_name = "DIR")]
        media_root: PathBuf,
        #[arg(value_name = "DIR")]
        dest: PathBuf,
    },
    /// Delete comments whose scheduled deletion is due
    Sweep {
        #[arg(long, value_name = "JSON")]
        store: PathBuf,
        #[arg(long)]
        dry_run: bool,
        /// Keep sweeping every sweep.interval_secs until interrupted
        #[arg(long)]
        watch: bool,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum PolicyArg {
    ReadWrite,
    CommentOnly,
    Full,
}

impl From<PolicyArg> for AccessPolicy {
    fn from(p: PolicyArg) -> Self {
        match p {
            PolicyArg::ReadWrite => AccessPolicy::ReadWrite,
            PolicyArg::CommentOnly => AccessPolicy::CommentOnly,
            PolicyArg::Full => AccessPolicy::Full,
        }
    }
}

#[derive(Serialize)]
struct CheckReport {
    entries: usize,
    xml_parts: usize,
    comments: usize,
    anchors_consistent: bool,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("serialize output")?);
    Ok(())
}

fn check(input: &Path) -> anyhow::Result<CheckReport> {
    let summary = verify_archive(input).with_context(|| format!("verify {}", input.display()))?;
    let pkg = DocxPackage::read(input)?;
    let doc = pkg
        .part_tree(DOCUMENT_PART)?
        .with_context(|| format!("{DOCUMENT_PART} missing"))?;
    let comments = pkg.part_tree(COMMENTS_PART)?;
    let mut ids = anchor_ids(&doc);
    if let Some(c) = comments.as_ref() {
        ids.extend(comment_ids(c));
    }
    let ids: Vec<u32> = ids.into_iter().collect();
    let anchors_consistent = match check_symmetry(comments.as_ref(), &doc, &ids) {
        Ok(()) => true,
        Err(e) => {
            log::warn!("{e}");
            false
        }
    };
    Ok(CheckReport {
        entries: summary.digests.len(),
        xml_parts: summary.xml_parts,
        comments: comments.as_ref().map(|c| comment_ids(c).len()).unwrap_or(0),
        anchors_consistent,
    })
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if let Command::InitConfig { dir, force } = &args.command {
        let dir = dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let cfg_path = init_default_config(&dir, *force).context("init default config")?;
        eprintln!("Wrote config: {}", cfg_path.display());
        return Ok(());
    }

    let workdir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let settings = EditorSettings::load(args.config.clone(), &workdir).context("load config")?;
    if let Some(p) = settings.config_path.as_ref() {
        log::info!("using config {}", p.display());
    }

    match args.command {
        Command::Parse { input } => {
            let parsed =
                parse_document(&input).with_context(|| format!("parse {}", input.display()))?;
            print_json(&parsed)?;
        }
        Command::Edit {
            input,
            paragraph,
            text,
        } => {
            let report = transaction::replace_paragraph_text(&input, &settings, paragraph, &text)
                .with_context(|| format!("edit paragraph {paragraph}"))?;
            print_json(&report)?;
        }
        Command::Insert {
            input,
            text,
            position,
        } => {
            let report = transaction::insert_paragraph(&input, &settings, &text, position)
                .context("insert paragraph")?;
            print_json(&report)?;
        }
        Command::Delete { input, paragraph } => {
            let report = transaction::delete_paragraph(&input, &settings, paragraph)
                .with_context(|| format!("delete paragraph {paragraph}"))?;
            print_json(&report)?;
        }
        Command::CommentAdd {
            input,
            paragraph,
            text,
            author,
        } => {
            let author = author.unwrap_or_else(|| settings.default_author.clone());
            let report =
                transaction::add_comment(&input, &settings, paragraph, &author, &text, 0)
                    .with_context(|| format!("comment on paragraph {paragraph}"))?;
            print_json(&report)?;
        }
        Command::CommentDelete { input, id } => {
            let report = transaction::delete_comment(&input, &settings, id)
                .with_context(|| format!("delete comment {id}"))?;
            print_json(&report)?;
        }
        Command::Images { input, dest } => {
            let images = extract_images(&input, &dest)
                .with_context(|| format!("extract images into {}", dest.display()))?;
            print_json(&images)?;
        }
        Command::Check { input } => {
            let report = check(&input)?;
            let ok = report.anchors_consistent;
            print_json(&report)?;
            if !ok {
                anyhow::bail!("comment anchors are inconsistent in {}", input.display());
            }
        }
        Command::Format { input } => {
            let mut settings = settings.clone();
            settings.reformat_all_parts = true;
            transaction::mutate_archive(&input, &settings, |_| Ok(()))
                .with_context(|| format!("format {}", input.display()))?;
            eprintln!("Formatted: {}", input.display());
        }
        Command::Upload {
            input,
            store,
            media_root,
            policy,
        } => {
            let bytes =
                std::fs::read(&input).with_context(|| format!("read {}", input.display()))?;
            let filename = input
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "document.docx".to_string());
            let store = Arc::new(MemoryStore::open(&store).context("open store")?);
            let svc = DocumentService::new(store, settings, policy.into(), media_root);
            let outcome = svc.upload(&filename, &bytes).context("upload")?;
            print_json(&outcome)?;
        }
        Command::Export {
            id,
            store,
            media_root,
            dest,
        } => {
            let store = Arc::new(MemoryStore::open(&store).context("open store")?);
            let svc = DocumentService::new(store, settings, AccessPolicy::ReadWrite, media_root);
            let out = svc.export(id, &dest).with_context(|| format!("export document {id}"))?;
            eprintln!("Exported: {}", out.display());
        }
        Command::Sweep {
            store,
            dry_run,
            watch,
        } => {
            let store = Arc::new(MemoryStore::open(&store).context("open store")?);
            if watch {
                let mut settings = settings.clone();
                settings.sweep_dry_run |= dry_run;
                let _sweeper = Sweeper::spawn(store, settings);
                loop {
                    std::thread::park();
                }
            }
            let outcome = sweep_due(&*store, &settings, Utc::now(), dry_run || settings.sweep_dry_run)
                .context("sweep")?;
            print_json(&outcome)?;
        }
        Command::InitConfig { .. } => {}
    }
    Ok(())
}
