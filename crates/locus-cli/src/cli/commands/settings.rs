use locus_resolver::Settings;

use super::super::args::{SettingsArgs, SettingsSub};
use crate::exit_codes::EXIT_SUCCESS;

pub(crate) async fn run(args: SettingsArgs) -> anyhow::Result<i32> {
    let path = super::settings_path(args.settings_file.as_deref())?;
    let mut settings = Settings::load(&path).await?;

    let changed = match &args.cmd {
        SettingsSub::Show => false,
        SettingsSub::Block { location } => {
            let added = settings.block(location);
            if !added {
                eprintln!("already blocked or empty: {}", location);
            }
            added
        }
        SettingsSub::Unblock { location } => {
            let removed = settings.unblock(location);
            if !removed {
                eprintln!("not blocked: {}", location);
            }
            removed
        }
        SettingsSub::Enable => !std::mem::replace(&mut settings.enabled, true),
        SettingsSub::Disable => std::mem::replace(&mut settings.enabled, false),
    };

    if changed {
        settings.save(&path).await?;
        eprintln!("settings saved ({})", path.display());
    }

    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(EXIT_SUCCESS)
}
