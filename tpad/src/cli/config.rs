use std::io::{BufWriter, Write};

use anyhow::Result;
use clap::Args;
use owo_colors::OwoColorize;

use super::Cli;

/// Print the session configuration in effect.
#[derive(Args)]
pub struct ConfigCommand {}

impl ConfigCommand {
    pub fn execute(&self, root: &Cli) -> Result<()> {
        let mut stdout = BufWriter::new(anstream::stdout());
        let config = root.session_config()?;

        if root.json {
            writeln!(stdout, "{}", serde_json::to_string(&config)?)?;
            return Ok(stdout.flush()?);
        }

        let timeouts = [
            ("command timeout", config.command_timeout),
            ("update timeout", config.update_timeout),
            ("version wait", config.version_wait),
            ("loader timeout", config.loader_timeout),
            ("retrieve wait", config.retrieve_wait),
            ("reader poll", config.reader_poll),
        ];

        writeln!(stdout, "{}: {:?}", "receive mode".bright_blue(), config.receive_mode)?;
        for (name, timeout) in timeouts {
            writeln!(stdout, "{}: {:?}", name.bright_blue(), timeout)?;
        }
        writeln!(
            stdout,
            "{}: {}",
            "undefined signal".bright_blue(),
            config.undefined_signal
        )?;

        let caps = config.capabilities;
        writeln!(stdout, "{}:", "capabilities".bright_blue())?;
        let flags = [
            ("3D data", caps.data_3d),
            ("3D runtime control", caps.rtc_3d),
            ("3D firmware version", caps.fw_version_3d),
            ("3D firmware update", caps.update_3d),
            ("2D data", caps.data_2d),
            ("2D runtime control", caps.rtc_2d),
            ("2D firmware update", caps.update_2d),
        ];
        let flags_len = flags.len();
        for (i, (name, enabled)) in flags.into_iter().enumerate() {
            writeln!(
                stdout,
                " {} {} {}",
                if i == flags_len - 1 { "╰─" } else { "├─" },
                if enabled {
                    "●".green().into_styled()
                } else {
                    "●".red().into_styled()
                },
                name
            )?;
        }

        stdout.flush()?;
        Ok(())
    }
}
