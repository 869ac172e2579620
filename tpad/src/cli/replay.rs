use std::{
    fs,
    io::{BufWriter, Write},
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
};

use anyhow::{Context, Result, bail};
use clap::{Args, ValueEnum};
use owo_colors::OwoColorize;
use serde::Serialize;
use serde_json::json;
use touchpad3d::{
    Refresh,
    Session,
    channel::TransportKind,
    framing::packet::DEFAULT_REPORT_ID,
    message::{Gesture2d, Gesture3d},
    sensor3d::data::SensorData,
    touch2d::data::Data2d,
};

use super::Cli;
use crate::capture::{self, CaptureTransport};

#[derive(Clone, Copy, PartialEq, Eq, Debug, ValueEnum)]
enum Framing {
    /// Sync-delimited 3D messages, as read from a serial port
    Stream,

    /// 64 byte packets carrying message chunks, as read from a HID interface
    Packet,
}

/// Replay captured transport traffic and print every published snapshot.
#[derive(Args)]
pub struct ReplayCommand {
    /// The capture file, one transport read per line in hex
    file: PathBuf,

    /// How the captured bytes are framed
    #[arg(short, long, value_enum, default_value_t = Framing::Stream)]
    framing: Framing,

    /// The report id of packet captures
    #[arg(long, default_value_t = DEFAULT_REPORT_ID)]
    report_id: u8,
}

#[derive(Serialize)]
#[serde(tag = "subsystem")]
enum Snapshot<'a> {
    #[serde(rename = "3d")]
    Sensor3d { skipped: u32, data: &'a SensorData },

    #[serde(rename = "2d")]
    Touch2d { skipped: u32, data: &'a Data2d },
}

#[derive(Default, Serialize)]
struct Summary {
    frames_3d: u32,
    messages_2d: u32,
    malformed: u64,
    log: Vec<String>,
}

impl ReplayCommand {
    pub fn execute(&self, root: &Cli) -> Result<()> {
        let mut stdout = BufWriter::new(anstream::stdout());
        let config = root.session_config()?;

        let text = fs::read_to_string(&self.file)
            .with_context(|| format!("failed to read {}", self.file.display()))?;
        let reads = capture::parse(&text)
            .with_context(|| format!("invalid capture {}", self.file.display()))?;

        let kind = match self.framing {
            Framing::Stream => TransportKind::Stream,
            Framing::Packet => TransportKind::Packet {
                report_id: self.report_id,
            },
        };
        let data_3d = config.capabilities.data_3d;
        let data_2d = config.capabilities.data_2d && kind != TransportKind::Stream;
        if !data_3d && !data_2d {
            bail!("the configuration disables all data this capture can carry");
        }

        let transport = Arc::new(CaptureTransport::new(kind, reads));
        let mut session = Session::new(transport.clone(), config);

        let log = Arc::new(Mutex::new(Vec::new()));
        session.set_logger({
            let log = Arc::clone(&log);
            move |line| {
                log.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(line.to_owned())
            }
        });
        session.open().context("failed to open the capture")?;

        let mut summary = Summary::default();
        loop {
            // Everything read before the capture ran dry is dispatched by now.
            let starved = transport.take_starved();
            let mut published = false;

            if data_3d && let Some(refresh) = session.retrieve_3d()? {
                published = true;
                summary.frames_3d += refresh.skipped + 1;
                self.print_3d(&mut stdout, root, refresh, session.sensor_data())?;
            }
            if data_2d && let Some(refresh) = session.retrieve_2d()? {
                published = true;
                summary.messages_2d += refresh.skipped + 1;
                self.print_2d(&mut stdout, root, refresh, session.data_2d())?;
            }

            if starved && !published {
                break;
            }
        }

        summary.malformed = session.malformed_count();
        summary.log = log.lock().unwrap_or_else(PoisonError::into_inner).clone();
        session.close();

        self.print_summary(&mut stdout, root, &summary)?;
        stdout.flush()?;

        Ok(())
    }

    fn print_3d(
        &self,
        stdout: &mut impl Write,
        root: &Cli,
        refresh: Refresh,
        data: &SensorData,
    ) -> Result<()> {
        if root.json {
            let snapshot = Snapshot::Sensor3d {
                skipped: refresh.skipped,
                data,
            };
            writeln!(stdout, "{}", serde_json::to_string(&snapshot)?)?;
            return Ok(());
        }

        let mut fields = vec![format!(
            "pos {}",
            format!(
                "{},{},{}",
                data.position.x, data.position.y, data.position.z
            )
            .bright_black()
        )];
        if data.gesture.gesture != Gesture3d::NoGesture {
            fields.push(format!("gesture {}", format!("{:?}", data.gesture.gesture).green()));
        }
        if !data.touch.touch_flags.is_empty() {
            let names: Vec<_> = data.touch.touch_flags.iter_names().map(|(name, _)| name).collect();
            fields.push(format!("touch {}", names.join("|").yellow()));
        }
        if !data.touch.tap_flags.is_empty() {
            let names: Vec<_> = data.touch.tap_flags.iter_names().map(|(name, _)| name).collect();
            fields.push(format!("tap {}", names.join("|").yellow()));
        }
        if data.air_wheel.active {
            fields.push(format!("wheel {}", data.air_wheel.counter.blue()));
        }
        if data.noise_power.valid {
            fields.push(format!("noise {:.2}", data.noise_power.value));
        }

        write!(
            stdout,
            "{} {:>6}  {}",
            "3D".bright_blue(),
            format!("#{}", data.frame_counter).bright_black(),
            fields.join("  ")
        )?;
        if refresh.skipped > 0 {
            let skipped = format!("(+{} skipped)", refresh.skipped);
            write!(stdout, "  {}", skipped.bright_black().italic())?;
        }
        writeln!(stdout)?;

        Ok(())
    }

    fn print_2d(
        &self,
        stdout: &mut impl Write,
        root: &Cli,
        refresh: Refresh,
        data: &Data2d,
    ) -> Result<()> {
        if root.json {
            let snapshot = Snapshot::Touch2d {
                skipped: refresh.skipped,
                data,
            };
            writeln!(stdout, "{}", serde_json::to_string(&snapshot)?)?;
            return Ok(());
        }

        let mut fields = Vec::new();
        if !data.fingers.is_empty() {
            let fingers: Vec<_> = data
                .fingers
                .as_slice()
                .iter()
                .map(|finger| format!("{}:{},{}", finger.finger_id, finger.x, finger.y))
                .collect();
            fields.push(format!("fingers {}", fingers.join(" ").bright_black()));
        }
        if !data.mouse.buttons.is_empty() {
            let names: Vec<_> = data.mouse.buttons.iter_names().map(|(name, _)| name).collect();
            fields.push(format!("buttons {}", names.join("|").yellow()));
        }
        if data.gesture != Gesture2d::NoGesture {
            fields.push(format!("gesture {}", format!("{:?}", data.gesture).green()));
        }

        write!(
            stdout,
            "{} {:>6}  {}",
            "2D".bright_magenta(),
            format!("#{}", data.msg_counter).bright_black(),
            fields.join("  ")
        )?;
        if refresh.skipped > 0 {
            let skipped = format!("(+{} skipped)", refresh.skipped);
            write!(stdout, "  {}", skipped.bright_black().italic())?;
        }
        writeln!(stdout)?;

        Ok(())
    }

    fn print_summary(&self, stdout: &mut impl Write, root: &Cli, summary: &Summary) -> Result<()> {
        if root.json {
            writeln!(stdout, "{}", json!({ "summary": summary }))?;
            return Ok(());
        }

        writeln!(
            stdout,
            "{}",
            format!(
                "{} 3D frames, {} 2D messages",
                summary.frames_3d, summary.messages_2d
            )
            .bright_black()
        )?;

        if summary.malformed == 0 {
            return Ok(());
        }

        writeln!(
            stdout,
            "{}",
            format!("{} malformed messages dropped", summary.malformed).yellow()
        )?;
        let log_len = summary.log.len();
        for (i, line) in summary.log.iter().enumerate() {
            writeln!(
                stdout,
                " {} {}",
                if i == log_len - 1 { "╰─" } else { "├─" },
                line.bright_black()
            )?;
        }

        Ok(())
    }
}
