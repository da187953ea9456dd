//! Command dispatch

use std::io;
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use clap_complete::generate;
use tracing::{debug, instrument};

use crate::application::services::Table;
use crate::application::IoResultExt;
use crate::cli::args::{Cli, Commands, ConfigCommands};
use crate::cli::output;
use crate::cli::{CliError, CliResult};
use crate::config::{global_config_path, local_config_path, Settings};
use crate::domain::{FormDefinition, Model};
use crate::infrastructure::ServiceContainer;

/// Run the parsed command line.
pub fn execute_command(cli: &Cli) -> CliResult<()> {
    let Some(command) = &cli.command else {
        return Err(CliError::Usage(
            "no command given, see --help".to_string(),
        ));
    };
    let project_dir = match &cli.project_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().map_err(|e| {
            crate::infrastructure::InfraError::io("determine current directory", e)
        })?,
    };
    let mut settings = Settings::load(Some(&project_dir))?;
    if let Commands::Compare { allow_legacy: true, .. } = command {
        settings.allow_legacy = true;
    }
    debug!(?settings, "effective settings");
    let container = ServiceContainer::new(settings);

    match command {
        Commands::Names { form } => names(&container, form),
        Commands::Repeats { form } => repeats(&container, form),
        Commands::Tree { form } => tree(&container, form),
        Commands::Identity { form } => identity(&container, form),
        Commands::Export {
            form,
            submissions,
            output,
            export_media,
            media_dir,
        } => export(
            &container,
            form,
            submissions,
            output.as_deref(),
            *export_media,
            media_dir.as_deref(),
        ),
        Commands::Compare {
            incoming,
            existing,
            title,
            ..
        } => compare(&container, incoming, existing, title.as_deref()),
        Commands::Config { command } => config(&container, command, &project_dir),
        Commands::Completion { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(*shell, &mut cmd, name, &mut io::stdout());
            Ok(())
        }
    }
}

fn submission_model(definition: &FormDefinition) -> CliResult<Model<'_>> {
    definition
        .submission_element()
        .ok_or_else(|| CliError::Usage("form has no submission element".to_string()))
}

fn names(container: &ServiceContainer, form: &Path) -> CliResult<()> {
    let definition = container.forms.load(form)?;
    let model = submission_model(&definition)?;
    for name in container.export.header(&model) {
        output::info(&name);
    }
    Ok(())
}

fn repeats(container: &ServiceContainer, form: &Path) -> CliResult<()> {
    let definition = container.forms.load(form)?;
    let model = submission_model(&definition)?;
    let repeats = model.repeatable_fields();
    if repeats.is_empty() {
        output::info("no repeat groups");
        return Ok(());
    }
    for repeat in repeats {
        output::header(&repeat.fqn());
        for name in container.export.repeat_header(&repeat) {
            output::detail(&name);
        }
    }
    Ok(())
}

fn tree(container: &ServiceContainer, form: &Path) -> CliResult<()> {
    let definition = container.forms.load(form)?;
    output::info(&definition.tree().to_tree_string());
    Ok(())
}

fn identity(container: &ServiceContainer, form: &Path) -> CliResult<()> {
    let definition = container.forms.load(form)?;
    output::action("form id", definition.form_id());
    output::action(
        "version",
        definition.model_version().unwrap_or("(none)"),
    );
    output::action("title", definition.title());
    if let Some(element) = definition.submission_element().filter(|m| !m.is_root()) {
        output::action("submission element", &element.fqn());
    }
    output::action("encrypted", &definition.is_file_encrypted());
    output::action("uploadable", &definition.is_uploadable());
    if definition.is_invalid_form_xmlns() {
        output::warning("instance xmlns is not well-formed, accepted as legacy form id");
    }
    Ok(())
}

#[instrument(level = "debug", skip(container))]
fn export(
    container: &ServiceContainer,
    form: &Path,
    inputs: &[PathBuf],
    output_dir: Option<&Path>,
    export_media: bool,
    media_dir: Option<&str>,
) -> CliResult<()> {
    let export_settings = &container.settings.export;
    let definition = container.forms.load(form)?;
    let submissions = container.export.collect_submissions(inputs)?;
    let media_dir_name = media_dir.unwrap_or(&export_settings.media_dir_name);
    if media_dir_name.is_empty() || media_dir_name.contains(['/', '\\']) {
        return Err(CliError::InvalidArgs(format!(
            "media directory must be a plain directory name: '{}'",
            media_dir_name
        )));
    }
    let base_dir = output_dir.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    let tables = container.export.export(
        &definition,
        &submissions,
        export_settings.working_dir.as_deref(),
        export_media || export_settings.export_media,
        &base_dir.join(media_dir_name),
    )?;

    let Some(output_dir) = output_dir else {
        if let Some(main) = tables.first() {
            print_table(main);
        }
        return Ok(());
    };
    for table in &tables {
        let file_name = if table.name.is_empty() {
            format!("{}.csv", definition.title())
        } else {
            format!("{}-{}.csv", definition.title(), table.name)
        };
        let path = output_dir.join(file_name);
        write_table(container, table, &path)?;
        output::success(&format!("{} ({} rows)", path.display(), table.rows.len()));
    }
    Ok(())
}

fn print_table(table: &Table) {
    output::info(&output::csv_line(&table.header));
    for row in &table.rows {
        output::info(&output::csv_line(row));
    }
}

fn write_table(container: &ServiceContainer, table: &Table, path: &Path) -> CliResult<()> {
    let mut content = output::csv_line(&table.header);
    content.push('\n');
    for row in &table.rows {
        content.push_str(&output::csv_line(row));
        content.push('\n');
    }
    container
        .fs
        .ensure_parent(path)
        .with_path_context("create output directory", path)?;
    container
        .fs
        .write(path, &content)
        .with_path_context("write export table", path)?;
    Ok(())
}

fn compare(
    container: &ServiceContainer,
    incoming: &Path,
    existing: &Path,
    title: Option<&str>,
) -> CliResult<()> {
    let verdict = container.forms.compare_files(incoming, existing, title)?;
    if verdict.accepts_update() {
        output::success(&verdict);
        Ok(())
    } else {
        output::failure(&verdict);
        Err(CliError::UpdateRejected(verdict))
    }
}

fn config(container: &ServiceContainer, command: &ConfigCommands, project_dir: &Path) -> CliResult<()> {
    match command {
        ConfigCommands::Show => output::info(&container.settings.to_toml()?),
        ConfigCommands::Template => output::info(&Settings::template()),
        ConfigCommands::Path => {
            match global_config_path() {
                Some(path) => output::action("global", &path.display()),
                None => output::warning("no global config directory available"),
            }
            output::action("local", &local_config_path(project_dir).display());
        }
    }
    Ok(())
}
