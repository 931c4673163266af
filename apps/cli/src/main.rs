mod logging;

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use incipit_commands::{Command, CommandError, Response, Session};
use incipit_compile::ProcessEngine;
use incipit_project::{FileNode, ProjectMeta};
use incipit_settings::{default_config_dir, AppConfig, GlobalSettingsStore};
use tracing::debug;

#[derive(Parser)]
#[command(
    name = "incipit",
    about = "Open, edit and compile LaTeX projects",
    author,
    version
)]
struct Cli {
    /// 設定資料夾；預設為 $INCIPIT_CONFIG_DIR 或系統設定目錄。 / Configuration directory (defaults to $INCIPIT_CONFIG_DIR or the platform config dir).
    #[arg(long, global = true, value_name = "PATH")]
    config_dir: Option<PathBuf>,

    /// 覆寫排版程式。 / Typesetter program to run instead of the configured one.
    #[arg(long, global = true, value_name = "PROGRAM")]
    engine: Option<String>,

    /// 排版程式參數，可重複；支援 {input} 與 {outdir}。 / Typesetter argument (repeatable); `{input}` and `{outdir}` are substituted.
    #[arg(
        long = "engine-arg",
        global = true,
        value_name = "ARG",
        allow_hyphen_values = true
    )]
    engine_args: Vec<String>,

    /// 單次編譯逾時秒數。 / Seconds before a compile is killed.
    #[arg(long, global = true, value_name = "SECONDS")]
    timeout_secs: Option<u64>,

    /// 同時執行的編譯數量。 / Number of compiles allowed to run at once.
    #[arg(long, global = true, value_name = "N")]
    jobs: Option<usize>,

    /// 增加記錄詳細程度。 / Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 開啟專案並列出檔案樹。 / Open a project and print its file tree.
    Open(ProjectArgs),
    /// 建立新專案骨架。 / Create a new project skeleton.
    New(ProjectArgs),
    /// 輸出專案檔案內容。 / Print a project file.
    Read(FileArgs),
    /// 寫入專案檔案。 / Write a project file.
    Save(SaveArgs),
    /// 檢視或修改專案中繼資料。 / Inspect or change project metadata.
    #[command(subcommand)]
    Meta(MetaCommand),
    /// 檢視或修改全域設定。 / Inspect or change global settings.
    #[command(subcommand)]
    Settings(SettingsCommand),
    /// 檢查是否已有 PDF。 / Report whether a PDF has been built for a file.
    PdfExists(FileArgs),
    /// 取出已建置的 PDF。 / Copy a previously built PDF.
    LoadPdf(LoadPdfArgs),
    /// 編譯專案檔案。 / Compile a project file.
    Compile(CompileArgs),
}

#[derive(Args)]
struct ProjectArgs {
    /// 專案根目錄。 / Project root directory.
    path: PathBuf,
}

#[derive(Args)]
struct FileArgs {
    /// 專案根目錄；預設為目前目錄。 / Project root (defaults to the current directory).
    #[arg(long, value_name = "PATH")]
    project: Option<PathBuf>,
    /// 相對於專案根目錄的檔案。 / File relative to the project root.
    file: PathBuf,
}

#[derive(Args)]
struct SaveArgs {
    #[command(flatten)]
    target: FileArgs,
    /// 從檔案讀取內容。 / Read the new content from this file.
    #[arg(long, value_name = "FILE", conflicts_with = "stdin")]
    from: Option<PathBuf>,
    /// 從標準輸入讀取內容。 / Read the new content from stdin.
    #[arg(long)]
    stdin: bool,
}

#[derive(Args)]
struct LoadPdfArgs {
    #[command(flatten)]
    target: FileArgs,
    /// PDF 輸出位置。 / Where to write the PDF.
    #[arg(long, value_name = "FILE")]
    output: PathBuf,
}

#[derive(Args)]
struct CompileArgs {
    #[command(flatten)]
    target: FileArgs,
    /// 以此檔案內容取代未儲存的緩衝。 / Use this file's content as the unsaved buffer.
    #[arg(long, value_name = "FILE", conflicts_with = "stdin")]
    buffer: Option<PathBuf>,
    /// 從標準輸入讀取未儲存的緩衝。 / Read the unsaved buffer from stdin.
    #[arg(long)]
    stdin: bool,
    /// 另外複製 PDF 至此位置。 / Also copy the PDF here.
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,
    /// 目標正在編譯時直接失敗。 / Fail with Busy instead of waiting when the file is already compiling.
    #[arg(long)]
    no_wait: bool,
}

#[derive(Subcommand)]
enum MetaCommand {
    /// 顯示 `.incipit` 內容。 / Print the project metadata.
    Show {
        #[arg(long, value_name = "PATH")]
        project: Option<PathBuf>,
    },
    /// 設定主文件。 / Set the root document.
    SetRoot(FileArgs),
    /// 設定最後開啟的檔案。 / Set the last opened file.
    SetLast(FileArgs),
}

#[derive(Subcommand)]
enum SettingsCommand {
    /// 顯示全域設定。 / Print the global settings.
    Show,
    /// 清除最近開啟的專案。 / Forget the recent projects list.
    ClearRecent,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config_dir = match &cli.config_dir {
        Some(dir) => resolve_input_path(dir)?,
        None => default_config_dir()
            .ok_or_else(|| anyhow!("cannot determine a configuration directory; pass --config-dir"))?,
    };
    let _guard = logging::init_logging(&config_dir.join("logs"), cli.verbose)?;

    let config = effective_config(&cli, &config_dir);
    debug!(config_dir = %config_dir.display(), engine = %config.engine.program, "starting");
    let engine = build_engine(&config);
    let session = Session::new(
        GlobalSettingsStore::in_dir(&config_dir),
        config,
        Arc::new(engine),
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start async runtime")?;
    runtime.block_on(execute(&session, cli.command))
}

/// Applies command-line overrides on top of `config.json`.
fn effective_config(cli: &Cli, config_dir: &Path) -> AppConfig {
    let mut config = AppConfig::load(config_dir);
    if let Some(program) = &cli.engine {
        config.engine.program = program.clone();
    }
    if !cli.engine_args.is_empty() {
        config.engine.args = cli.engine_args.clone();
    }
    if let Some(timeout) = cli.timeout_secs {
        config.compile.timeout_secs = timeout;
    }
    if let Some(jobs) = cli.jobs {
        config.compile.max_parallel = jobs;
    }
    config.sanitize();
    config
}

fn build_engine(config: &AppConfig) -> ProcessEngine {
    let mut engine = ProcessEngine::new(&config.engine.program)
        .with_args(config.engine.args.iter().cloned())
        .with_timeout(Duration::from_secs(config.compile.timeout_secs));
    for (key, value) in &config.engine.env {
        engine = engine.with_env(key, value);
    }
    engine
}

async fn execute(session: &Session, command: Commands) -> Result<()> {
    match command {
        Commands::Open(args) => {
            let path = resolve_input_path(&args.path)?;
            let response = dispatch(session, Command::OpenProject { path }).await?;
            print_tree(&expect_tree(response)?, 0);
        }
        Commands::New(args) => {
            let path = resolve_input_path(&args.path)?;
            let response = dispatch(session, Command::CreateNewProject { path }).await?;
            let tree = expect_tree(response)?;
            println!("Created project at {}", tree.path.display());
            print_tree(&tree, 0);
        }
        Commands::Read(args) => {
            let (project_root, relative_path) = file_target(args)?;
            match dispatch(
                session,
                Command::ReadFile {
                    project_root,
                    relative_path,
                },
            )
            .await?
            {
                Response::Content(content) => print!("{content}"),
                other => bail!("unexpected response: {other:?}"),
            }
        }
        Commands::Save(args) => {
            let content = match (&args.from, args.stdin) {
                (Some(path), _) => fs::read_to_string(path)
                    .with_context(|| format!("read {}", path.display()))?,
                (None, true) => read_stdin()?,
                (None, false) => bail!("save needs --from FILE or --stdin"),
            };
            let (project_root, relative_path) = file_target(args.target)?;
            dispatch(
                session,
                Command::SaveFile {
                    project_root,
                    relative_path: relative_path.clone(),
                    content,
                },
            )
            .await?;
            println!("Saved {}", relative_path.display());
        }
        Commands::Meta(command) => execute_meta(session, command).await?,
        Commands::Settings(command) => execute_settings(session, command).await?,
        Commands::PdfExists(args) => {
            let (project_root, relative_path) = file_target(args)?;
            match dispatch(
                session,
                Command::CheckPdfExists {
                    project_root,
                    relative_path,
                },
            )
            .await?
            {
                Response::Exists(exists) => println!("{exists}"),
                other => bail!("unexpected response: {other:?}"),
            }
        }
        Commands::LoadPdf(args) => {
            let output = resolve_input_path(&args.output)?;
            let (project_root, relative_path) = file_target(args.target)?;
            let response = dispatch(
                session,
                Command::LoadPdf {
                    project_root,
                    relative_path,
                },
            )
            .await?;
            let artifact = match response {
                Response::Pdf(artifact) => artifact,
                other => bail!("unexpected response: {other:?}"),
            };
            fs::write(&output, &*artifact.bytes)
                .with_context(|| format!("write {}", output.display()))?;
            println!("Wrote {} ({} bytes)", output.display(), artifact.len());
        }
        Commands::Compile(args) => {
            let unsaved_buffer = match (&args.buffer, args.stdin) {
                (Some(path), _) => Some(
                    fs::read_to_string(path)
                        .with_context(|| format!("read {}", path.display()))?,
                ),
                (None, true) => Some(read_stdin()?),
                (None, false) => None,
            };
            let output = args.output.as_deref().map(resolve_input_path).transpose()?;
            let (project_root, relative_path) = file_target(args.target)?;
            let response = dispatch(
                session,
                Command::CompileLatexProject {
                    project_root,
                    relative_path,
                    unsaved_buffer,
                    no_wait: args.no_wait,
                },
            )
            .await?;
            let artifact = match response {
                Response::Pdf(artifact) => artifact,
                other => bail!("unexpected response: {other:?}"),
            };
            println!(
                "Built {} ({} bytes)",
                artifact.path.display(),
                artifact.len()
            );
            if let Some(output) = output {
                fs::write(&output, &*artifact.bytes)
                    .with_context(|| format!("write {}", output.display()))?;
                println!("Wrote {}", output.display());
            }
        }
    }
    Ok(())
}

async fn execute_meta(session: &Session, command: MetaCommand) -> Result<()> {
    match command {
        MetaCommand::Show { project } => {
            let project_root = resolve_project(project)?;
            let meta = load_meta(session, &project_root).await?;
            println!("{}", serde_json::to_string_pretty(&meta)?);
        }
        MetaCommand::SetRoot(args) => {
            let (project_root, relative_path) = file_target(args)?;
            let mut meta = load_meta(session, &project_root).await?;
            meta.root_file = relative_path.to_string_lossy().into_owned();
            save_meta(session, project_root, meta).await?;
            println!("Root file set to {}", relative_path.display());
        }
        MetaCommand::SetLast(args) => {
            let (project_root, relative_path) = file_target(args)?;
            let mut meta = load_meta(session, &project_root).await?;
            meta.select_file(relative_path.to_string_lossy());
            save_meta(session, project_root, meta).await?;
            println!("Last opened file set to {}", relative_path.display());
        }
    }
    Ok(())
}

async fn execute_settings(session: &Session, command: SettingsCommand) -> Result<()> {
    match command {
        SettingsCommand::Show => match dispatch(session, Command::LoadGlobalSettings).await? {
            Response::GlobalSettings(settings) => {
                println!("{}", serde_json::to_string_pretty(&settings)?)
            }
            other => bail!("unexpected response: {other:?}"),
        },
        SettingsCommand::ClearRecent => {
            session
                .update_global_settings(|settings| settings.recent_projects.clear())
                .map_err(command_error)?;
            println!("Cleared recent projects");
        }
    }
    Ok(())
}

async fn load_meta(session: &Session, project_root: &Path) -> Result<ProjectMeta> {
    match dispatch(
        session,
        Command::LoadProjectMeta {
            project_root: project_root.to_path_buf(),
        },
    )
    .await?
    {
        Response::ProjectMeta(meta) => Ok(meta),
        other => bail!("unexpected response: {other:?}"),
    }
}

async fn save_meta(session: &Session, project_root: PathBuf, meta: ProjectMeta) -> Result<()> {
    dispatch(session, Command::SaveProjectMeta { project_root, meta }).await?;
    Ok(())
}

async fn dispatch(session: &Session, command: Command) -> Result<Response> {
    session.dispatch(command).await.map_err(command_error)
}

fn command_error(err: CommandError) -> anyhow::Error {
    anyhow!("{:?}: {}", err.kind, err.message)
}

fn expect_tree(response: Response) -> Result<FileNode> {
    match response {
        Response::Tree(tree) => Ok(tree),
        other => bail!("unexpected response: {other:?}"),
    }
}

fn print_tree(node: &FileNode, depth: usize) {
    let suffix = if node.is_directory { "/" } else { "" };
    if depth == 0 {
        println!("{}{suffix}", node.path.display());
    } else {
        println!("{}{}{suffix}", "  ".repeat(depth), node.name);
    }
    for child in node.children.iter().flatten() {
        print_tree(child, depth + 1);
    }
}

fn file_target(args: FileArgs) -> Result<(PathBuf, PathBuf)> {
    Ok((resolve_project(args.project)?, args.file))
}

fn resolve_project(project: Option<PathBuf>) -> Result<PathBuf> {
    match project {
        Some(path) => resolve_input_path(&path),
        None => std::env::current_dir().context("determine current directory"),
    }
}

fn resolve_input_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()
            .context("determine current directory")?
            .join(path))
    }
}

fn read_stdin() -> Result<String> {
    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("read stdin")?;
    Ok(buffer)
}
