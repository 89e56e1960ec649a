use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use wikifunctions::dump_parser::DumpParser;
use wikifunctions::find_and_replace::{FindAndReplace, Replacement};
use wikifunctions::pipeline::Pipeline;
use wikifunctions::profile::{GeneralFixOptions, SkipOptions, WikiProfile};
use wikifunctions::wiki_diff::{DiffRow, WikiDiff};

#[derive(Debug, clap::Parser)]
#[command(version, about)]
struct CommandLine {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Args)]
struct PipelineArgs {
    /// Wiki profile (TOML); English Wikipedia when omitted
    #[arg(long)]
    profile: Option<PathBuf>,
    /// Find-and-replace rules (JSON array)
    #[arg(long)]
    rules: Option<PathBuf>,
    /// Replace a lone `<references />` by the reflist template
    #[arg(long)]
    replace_reference_tags: bool,
    /// Only add DEFAULTSORT to biographies
    #[arg(long)]
    restrict_defaultsort_addition: bool,
    /// Skip dash, non-breaking space and date ordinal fixes
    #[arg(long)]
    no_mos_compliance_fixes: bool,
}

impl PipelineArgs {
    fn build(&self, skip: SkipOptions) -> anyhow::Result<Pipeline> {
        let profile = match &self.profile {
            Some(path) => WikiProfile::load_from_path(path)?,
            None => WikiProfile::default(),
        };
        let rules: Vec<Replacement> = match &self.rules {
            Some(path) => FindAndReplace::load_rules(path)?,
            None => Vec::new(),
        };
        let options = GeneralFixOptions {
            replace_reference_tags: self.replace_reference_tags,
            restrict_defaultsort_addition: self.restrict_defaultsort_addition,
            no_mos_compliance_fixes: self.no_mos_compliance_fixes,
        };
        Ok(Pipeline::new(profile, options, skip, rules)?)
    }
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Run the pipeline over one wikitext file and print the result
    Fix {
        input_file: PathBuf,
        /// Article title; defaults to the file stem
        #[arg(long)]
        title: Option<String>,
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
    /// Run the pipeline over an XML dump, one JSON line per changed page
    Scan {
        dump_file: PathBuf,
        /// Also process pages outside the main namespace
        #[arg(long)]
        all_namespaces: bool,
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
    /// Show the line diff between two files
    Diff {
        old_file: PathBuf,
        new_file: PathBuf,
        #[arg(long, default_value_t = 2)]
        context: usize,
        /// Print an HTML table body instead of unified-style text
        #[arg(long)]
        html: bool,
    },
}

fn read_text(path: &Path) -> anyhow::Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn fix(input_file: &Path, title: Option<String>, args: &PipelineArgs) -> anyhow::Result<()> {
    let text = read_text(input_file)?;
    let title = title.unwrap_or_else(|| {
        input_file
            .file_stem()
            .map(|stem| stem.to_string_lossy().replace('_', " "))
            .unwrap_or_default()
    });

    let pipeline = args.build(SkipOptions::default())?;
    let processed = pipeline.process(&title, &text)?;

    if let Some(bracket) = &processed.unbalanced_bracket {
        eprintln!(
            "warning: unbalanced bracket at byte {} (length {})",
            bracket.position, bracket.length
        );
    }
    for error in &processed.rule_errors {
        eprintln!("warning: {error}");
    }
    eprintln!("summary: {}", processed.summary);
    print!("{}", processed.text);
    Ok(())
}

fn scan(dump_file: &Path, all_namespaces: bool, args: &PipelineArgs) -> anyhow::Result<()> {
    let skip = SkipOptions {
        skip_no_change: true,
        ..SkipOptions::default()
    };
    let pipeline = args.build(skip)?;

    let file = File::open(dump_file)
        .with_context(|| format!("failed to open {}", dump_file.display()))?;
    let mut parser = DumpParser::new(BufReader::new(file))?;
    tracing::info!(dbname = parser.site_info().dbname.as_str(), "Scanning dump");

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let (mut scanned, mut changed) = (0usize, 0usize);
    while let Some(page) = parser.parse_page()? {
        if !all_namespaces && page.namespace != 0 {
            continue;
        }
        let Some(text) = page.text() else {
            continue;
        };
        scanned += 1;

        let processed = match pipeline.process(&page.title, text) {
            Ok(processed) => processed,
            Err(err) => {
                tracing::error!(title = page.title.as_str(), error = %err, "Skipping page");
                continue;
            }
        };
        if processed.skipped() {
            continue;
        }
        changed += 1;

        let bracket = processed.unbalanced_bracket.map(|bracket| bracket.position);
        let line = serde_json::json!({
            "title": processed.title,
            "summary": processed.summary,
            "major": processed.major_change,
            "general_fixes_only": processed.general_fixes_caused_change && !processed.major_change,
            "unbalanced_bracket": bracket,
        });
        writeln!(out, "{line}")?;
    }
    out.flush()?;
    tracing::info!(scanned, changed, "Scan finished");
    Ok(())
}

fn diff(old_file: &Path, new_file: &Path, context: usize, html: bool) -> anyhow::Result<()> {
    let old = read_text(old_file)?;
    let new = read_text(new_file)?;
    let wiki_diff = WikiDiff::new(&old, &new, context);

    if html {
        print!("{}", wiki_diff.to_html());
        return Ok(());
    }

    let (left, right) = (wiki_diff.left_lines(), wiki_diff.right_lines());
    for row in wiki_diff.rows() {
        match row {
            DiffRow::Header { left, right } => println!("@@ line {} / {} @@", left + 1, right + 1),
            DiffRow::Context { right: index, .. } => println!(" {}", right[index]),
            DiffRow::Changed { left: l, right: r } => {
                println!("-{}", left[l]);
                println!("+{}", right[r]);
            }
            DiffRow::Deleted { left: index } => println!("-{}", left[index]),
            DiffRow::Added { right: index } => println!("+{}", right[index]),
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = CommandLine::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("wikifunctions=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match args.command {
        Command::Fix {
            input_file,
            title,
            pipeline,
        } => fix(&input_file, title, &pipeline),
        Command::Scan {
            dump_file,
            all_namespaces,
            pipeline,
        } => scan(&dump_file, all_namespaces, &pipeline),
        Command::Diff {
            old_file,
            new_file,
            context,
            html,
        } => diff(&old_file, &new_file, context, html),
    }
}
