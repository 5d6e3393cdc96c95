use std::{
    collections::{BTreeSet, HashSet},
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use note::core::{MetadataValue, Section};
use note::dates;
use note::document::Document;
use note::parser::ParsedNote;
use note::sections::SectionIndex;
use note::storage::{FsStore, NoteLocation};
use note::syntax;
use note::task::{Priority, Task};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "note",
    about = "Markdown vault tooling built on the note crate",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging (RUST_LOG takes precedence).
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Parse notes and print their front matter and sections.
    Parse(ParseArgs),

    /// Re-serialize notes in canonical form.
    Format(FormatArgs),

    /// Print the heading outline of a note.
    Headers(HeadersArgs),

    /// Print the section found by a heading path such as "Projects > Active".
    Show(ShowArgs),

    /// Append or prepend text to a section.
    Append(AppendArgs),

    /// Set or remove a front-matter property.
    Set(SetArgs),

    /// Add a task line to a section.
    Task(TaskArgs),

    /// List the task lines of a note, grouped by section.
    Tasks(TasksArgs),

    /// Create the daily note for a date, or print it when it already exists.
    Daily(DailyArgs),
}

#[derive(Debug, Args)]
struct ParseArgs {
    /// Markdown notes or directories containing notes.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Emit JSON instead of an outline.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct FormatArgs {
    /// Markdown notes or directories to format.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Overwrite the file instead of printing to stdout.
    #[arg(long)]
    in_place: bool,
}

#[derive(Debug, Args)]
struct HeadersArgs {
    file: PathBuf,
}

#[derive(Debug, Args)]
struct ShowArgs {
    file: PathBuf,
    /// Heading path, components separated by " > ".
    path: String,
    /// Also print the sections nested under the match.
    #[arg(long)]
    subsections: bool,
}

#[derive(Debug, Args)]
struct AppendArgs {
    file: PathBuf,
    /// Heading path of the target section.
    #[arg(long)]
    section: String,
    #[arg(long)]
    text: String,
    /// Insert at the start of the section body instead of the end.
    #[arg(long)]
    prepend: bool,
    /// Create the section at this heading level when the path does not resolve.
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=6))]
    create_level: Option<u8>,
}

#[derive(Debug, Args)]
struct SetArgs {
    file: PathBuf,
    key: String,
    /// Raw value; coerced like a front-matter line (lists, quotes, booleans, numbers).
    #[arg(required_unless_present = "remove")]
    value: Option<String>,
    #[arg(long, conflicts_with = "value")]
    remove: bool,
}

#[derive(Debug, Args)]
struct TaskArgs {
    file: PathBuf,
    /// Heading path of the target section.
    #[arg(long)]
    section: String,
    description: String,
    /// Due date (YYYY-MM-DD).
    #[arg(long)]
    due: Option<NaiveDate>,
    /// Scheduled date (YYYY-MM-DD).
    #[arg(long)]
    scheduled: Option<NaiveDate>,
    /// Start date (YYYY-MM-DD).
    #[arg(long)]
    start: Option<NaiveDate>,
    /// highest, high, medium, low or lowest.
    #[arg(long)]
    priority: Option<Priority>,
    #[arg(long = "tag")]
    tags: Vec<String>,
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=6))]
    create_level: Option<u8>,
}

#[derive(Debug, Args)]
struct TasksArgs {
    file: PathBuf,
    /// Only list tasks that are not completed.
    #[arg(long)]
    open: bool,
}

#[derive(Debug, Args)]
struct DailyArgs {
    /// Vault root directory.
    #[arg(long, env = "NOTE_VAULT")]
    vault: PathBuf,
    /// Folder inside the vault for daily notes.
    #[arg(long)]
    folder: Option<PathBuf>,
    /// Date of the note. Defaults to today.
    #[arg(long)]
    date: Option<NaiveDate>,
    /// Level-2 headings to create in a new note.
    #[arg(long = "heading")]
    headings: Vec<String>,
    /// Tags recorded in the front matter of a new note.
    #[arg(long = "tag")]
    tags: Vec<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Parse(args) => handle_parse(args),
        Commands::Format(args) => handle_format(args),
        Commands::Headers(args) => handle_headers(args),
        Commands::Show(args) => handle_show(args),
        Commands::Append(args) => handle_append(args),
        Commands::Set(args) => handle_set(args),
        Commands::Task(args) => handle_task(args),
        Commands::Tasks(args) => handle_tasks(args),
        Commands::Daily(args) => handle_daily(args),
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn open_note(path: &Path) -> Document<FsStore> {
    Document::at_path(FsStore, path)
}

fn handle_parse(args: ParseArgs) -> Result<()> {
    let ParseArgs { inputs, json } = args;
    let expanded = expand_inputs(&inputs)?;
    if expanded.is_empty() {
        anyhow::bail!("no Markdown notes found in the provided inputs");
    }

    let mut parsed = Vec::new();
    for path in expanded {
        debug!(path = ?path, "parsing note");
        let mut doc = open_note(&path);
        doc.parse()
            .with_context(|| format!("parsing {:?}", path))?;
        parsed.push((path, doc));
    }

    if json {
        #[derive(serde::Serialize)]
        struct JsonOutput<'a> {
            path: String,
            note: &'a ParsedNote,
        }

        let mut payload = Vec::with_capacity(parsed.len());
        for (path, doc) in parsed.iter_mut() {
            payload.push(JsonOutput {
                path: path.display().to_string(),
                note: doc.note()?,
            });
        }
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        let count = parsed.len();
        for (idx, (path, doc)) in parsed.iter_mut().enumerate() {
            if count > 1 {
                if idx > 0 {
                    println!();
                }
                println!("== {} ==", path.display());
            }
            let note = doc.note()?;
            for (key, value) in note.front_matter.iter() {
                println!("{key}: {value}");
            }
            for section in &note.sections {
                println!("{}", describe_section(section));
            }
        }
    }

    Ok(())
}

fn describe_section(section: &Section) -> String {
    let indent = "  ".repeat(usize::from(section.level().saturating_sub(1)));
    let title = if section.title().is_empty() {
        "(root)"
    } else {
        section.title()
    };
    format!(
        "{indent}[{}] {} ({} lines)",
        section.level(),
        title,
        section.body().lines().count()
    )
}

fn handle_format(args: FormatArgs) -> Result<()> {
    let FormatArgs { inputs, in_place } = args;
    let expanded = expand_inputs(&inputs)?;
    if expanded.is_empty() {
        anyhow::bail!("no Markdown notes found in the provided inputs");
    }

    let mut first = true;
    for path in expanded {
        debug!(path = ?path, "formatting note");
        let mut doc = open_note(&path);
        if in_place {
            doc.save()?;
            continue;
        }

        let formatted = doc
            .render()
            .with_context(|| format!("parsing {:?}", path))?;
        if !first {
            println!();
            println!("== {} ==", path.display());
        } else if inputs.len() > 1 {
            println!("== {} ==", path.display());
        }
        first = false;
        print_note(&formatted);
    }

    Ok(())
}

fn handle_headers(args: HeadersArgs) -> Result<()> {
    let mut doc = open_note(&args.file);
    for header in doc.headers()? {
        let indent = "  ".repeat(usize::from(header.level.saturating_sub(1)));
        let marker = syntax::HEADING_MARKER
            .to_string()
            .repeat(usize::from(header.level));
        println!("{indent}{marker} {}", header.title);
    }
    Ok(())
}

fn handle_show(args: ShowArgs) -> Result<()> {
    let ShowArgs {
        file,
        path,
        subsections,
    } = args;
    let mut doc = open_note(&file);
    let sections = doc.sections()?;
    let Some(section) = sections.find_by_path(&path) else {
        anyhow::bail!("no section matches {:?} in {:?}", path, file);
    };
    println!("{}", section.render());
    if subsections {
        for nested in section.subsections(sections.as_slice()) {
            println!("{}", nested.render());
        }
    }
    Ok(())
}

fn handle_append(args: AppendArgs) -> Result<()> {
    let AppendArgs {
        file,
        section,
        text,
        prepend,
        create_level,
    } = args;
    let mut doc = open_note(&file);
    {
        let mut sections = doc.sections()?;
        let target = resolve_section(&mut sections, &section, create_level)?;
        if prepend {
            target.prepend(&text);
        } else {
            target.append(&text);
        }
    }
    doc.save()?;
    debug!(path = ?file, section = %section, "updated section");
    Ok(())
}

fn handle_set(args: SetArgs) -> Result<()> {
    let SetArgs {
        file,
        key,
        value,
        remove,
    } = args;
    let mut doc = open_note(&file);
    if remove {
        if doc.remove_front_matter_property(&key)?.is_none() {
            warn!(key = %key, path = ?file, "front matter property not present");
            return Ok(());
        }
    } else {
        let Some(raw) = value else {
            anyhow::bail!("a value is required unless --remove is given");
        };
        doc.set_front_matter_property(key, MetadataValue::parse(&raw))?;
    }
    doc.save()
}

fn handle_task(args: TaskArgs) -> Result<()> {
    let TaskArgs {
        file,
        section,
        description,
        due,
        scheduled,
        start,
        priority,
        tags,
        create_level,
    } = args;

    let task = Task {
        due,
        scheduled,
        start,
        priority,
        tags: tags.iter().collect(),
        ..Task::new(description)
    };

    let mut doc = open_note(&file);
    {
        let mut sections = doc.sections()?;
        let target = resolve_section(&mut sections, &section, create_level)?;
        target.add_task(&task);
    }
    doc.save()?;
    println!("{}", task.to_markdown());
    Ok(())
}

fn handle_tasks(args: TasksArgs) -> Result<()> {
    let TasksArgs { file, open } = args;
    let mut doc = open_note(&file);
    let sections = doc.sections()?;
    for section in &sections {
        let tasks: Vec<Task> = section
            .tasks()
            .into_iter()
            .filter(|task| !open || !task.completed)
            .collect();
        if tasks.is_empty() {
            continue;
        }
        let label = if section.title().is_empty() {
            "(root)"
        } else {
            section.title()
        };
        println!("{label}");
        for task in tasks {
            println!("  {}", task.to_markdown());
        }
    }
    Ok(())
}

fn handle_daily(args: DailyArgs) -> Result<()> {
    let DailyArgs {
        vault,
        folder,
        date,
        headings,
        tags,
    } = args;
    let date = date.unwrap_or_else(|| Local::now().date_naive());

    let mut location = NoteLocation::new(vault, dates::daily_file_name(date));
    if let Some(folder) = folder {
        location = location.in_folder(folder);
    }
    let mut doc = Document::new(FsStore, &location);

    if doc.exists() {
        debug!(path = ?doc.path(), "daily note already exists");
    } else {
        fill_daily_note(&mut doc, date, &headings, tags)?;
        doc.save()?;
        eprintln!("Wrote new daily note to {:?}", doc.path());
    }

    print_note(&doc.render()?);
    Ok(())
}

fn fill_daily_note<S: note::storage::NoteStore>(
    doc: &mut Document<S>,
    date: NaiveDate,
    headings: &[String],
    tags: Vec<String>,
) -> Result<()> {
    doc.set_front_matter([
        ("date", MetadataValue::from(dates::to_iso(date))),
        ("day", MetadataValue::from(dates::day_of_week(date))),
    ])?;
    if !tags.is_empty() {
        doc.set_front_matter_property(syntax::TAGS_KEY, tags)?;
    }
    let mut sections = doc.sections()?;
    sections.add(&dates::display_date(date), "", 1, None)?;
    for heading in headings {
        sections.add(heading, "", 2, None)?;
    }
    Ok(())
}

/// Resolve a heading path. When it does not resolve and `create_level` is given, the last
/// component is added after its parent's subsections, or at the end of the note for a
/// single-component path.
fn resolve_section<'a>(
    sections: &'a mut SectionIndex<'_>,
    path: &str,
    create_level: Option<u8>,
) -> Result<&'a mut Section> {
    if sections.position_by_path(path).is_none() {
        let Some(level) = create_level else {
            anyhow::bail!("no section matches {:?}; pass --create-level to add it", path);
        };
        let (index, title) = match path.rsplit_once(syntax::PATH_DELIMITER) {
            Some((parent_path, title)) => {
                let parent = sections
                    .position_by_path(parent_path)
                    .with_context(|| format!("no section matches {:?}", parent_path))?;
                let parent_level = sections.get(parent).map_or(0, Section::level);
                if level <= parent_level {
                    anyhow::bail!(
                        "level {level} does not nest under {:?} (level {parent_level})",
                        parent_path
                    );
                }
                (sections.end_of_subtree(parent), title.trim())
            }
            None => (sections.len(), path.trim()),
        };
        debug!(title, level, index, "creating missing section");
        sections.insert(index, title, "", level)?;
    }
    sections
        .find_by_path_mut(path)
        .with_context(|| format!("no section matches {:?}", path))
}

fn print_note(text: &str) {
    print!("{text}");
    if !text.ends_with('\n') {
        println!();
    }
}

fn is_note(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext == syntax::NOTE_EXTENSION)
        .unwrap_or(false)
}

fn collect_notes(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut visited = HashSet::new();
    visit_dir(dir, &mut files, &mut visited)?;
    files.sort();
    Ok(files)
}

fn expand_inputs(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut visited = BTreeSet::new();
    for path in paths {
        let canonical =
            fs::canonicalize(path).with_context(|| format!("resolving path {:?}", path))?;
        let meta = fs::metadata(&canonical)
            .with_context(|| format!("reading metadata for {:?}", canonical))?;
        if meta.is_dir() {
            debug!(dir = ?canonical, "scanning directory");
            for file in collect_notes(&canonical)? {
                if visited.insert(file.clone()) {
                    out.push(file);
                }
            }
        } else if meta.is_file() {
            if !is_note(&canonical) {
                anyhow::bail!("{:?} is not a .{} note", canonical, syntax::NOTE_EXTENSION);
            }
            if visited.insert(canonical.clone()) {
                out.push(canonical);
            }
        }
    }
    Ok(out)
}

fn visit_dir(path: &Path, out: &mut Vec<PathBuf>, visited: &mut HashSet<PathBuf>) -> Result<()> {
    let canonical = fs::canonicalize(path)?;
    if !visited.insert(canonical.clone()) {
        return Ok(());
    }

    let metadata = fs::metadata(&canonical)?;
    if metadata.is_dir() {
        for entry in fs::read_dir(&canonical)? {
            let entry = entry?;
            if entry.file_type()?.is_symlink() {
                continue;
            }
            visit_dir(&entry.path(), out, visited)?;
        }
    } else if metadata.is_file() && is_note(&canonical) {
        out.push(canonical);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use note::storage::MemoryStore;

    #[test]
    fn expand_inputs_collects_notes_recursively() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        fs::create_dir_all(root.join("daily")).expect("mkdir daily");
        fs::write(root.join("inbox.md"), "# Inbox").expect("write inbox");
        fs::write(root.join("daily").join("2025-10-05.md"), "# Day").expect("write day");
        fs::write(root.join("daily").join("attachment.png"), "").expect("write png");

        let found = expand_inputs(&[root.to_path_buf(), root.join("inbox.md")]).expect("expand");

        let canonical = fs::canonicalize(root).expect("canonical root");
        assert_eq!(
            found,
            vec![
                canonical.join("daily").join("2025-10-05.md"),
                canonical.join("inbox.md"),
            ]
        );
    }

    #[test]
    fn expand_inputs_rejects_other_files() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("notes.txt");
        fs::write(&path, "plain").expect("write txt");
        assert!(expand_inputs(&[path]).is_err());
    }

    #[test]
    fn resolve_section_follows_paths_and_creates_on_request() {
        let store = MemoryStore::new().with_file("n.md", "# Projects\n## Active\none\n");
        let mut doc = Document::at_path(&store, "n.md");
        let mut sections = doc.sections().expect("sections");

        let active = resolve_section(&mut sections, "Projects > Active", None).expect("active");
        active.append("two");
        assert_eq!(active.body(), "one\ntwo");

        assert!(resolve_section(&mut sections, "Projects > Later", None).is_err());
        let later = resolve_section(&mut sections, "Projects > Later", Some(2)).expect("created");
        assert_eq!(later.title(), "Later");
        assert_eq!(later.level(), 2);
    }

    #[test]
    fn created_sections_stay_under_their_parent() {
        let store = MemoryStore::new().with_file("n.md", "# Projects\n## Active\n# Other\n");
        let mut doc = Document::at_path(&store, "n.md");
        let mut sections = doc.sections().expect("sections");

        let created = resolve_section(&mut sections, "Projects > Later", Some(2))
            .expect("created")
            .id();
        let titles: Vec<&str> = sections.iter().map(|s| s.title()).collect();
        assert_eq!(titles, ["Projects", "Active", "Later", "Other"]);

        let again = resolve_section(&mut sections, "Projects > Later", Some(2)).expect("found");
        assert_eq!(again.id(), created);
        assert_eq!(sections.len(), 4);

        assert!(resolve_section(&mut sections, "Projects > Flat", Some(1)).is_err());
        assert!(resolve_section(&mut sections, "Missing > Child", Some(2)).is_err());
        let inbox = resolve_section(&mut sections, "Inbox", Some(1)).expect("top level");
        assert_eq!(inbox.level(), 1);
        assert_eq!(sections.get(4).map(|s| s.title()), Some("Inbox"));
    }

    #[test]
    fn daily_note_layout() {
        let store = MemoryStore::new();
        let mut doc = Document::at_path(&store, "2025-10-05.md");
        let date = NaiveDate::from_ymd_opt(2025, 10, 5).expect("date");
        fill_daily_note(
            &mut doc,
            date,
            &["Tasks".to_string(), "Log".to_string()],
            vec!["#daily".to_string()],
        )
        .expect("fill");
        doc.save().expect("save");

        assert_eq!(
            store.contents(Path::new("2025-10-05.md")).as_deref(),
            Some(
                "---\ndate: \"2025-10-05\"\nday: \"Sunday\"\ntags: [\"daily\"]\n---\n\n# October 5, 2025\n\n## Tasks\n\n## Log"
            )
        );
    }

    #[test]
    fn describe_section_indents_by_level() {
        let section = Section::new("Deep", "a\nb", 3).expect("section");
        assert_eq!(describe_section(&section), "    [3] Deep (2 lines)");
        assert_eq!(describe_section(&Section::root("x")), "[0] (root) (1 lines)");
    }
}
