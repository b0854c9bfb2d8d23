#[macro_use]
extern crate log;

extern crate structopt;
use structopt::StructOpt;

extern crate simplelog;
use simplelog::{Config, LevelFilter, SimpleLogger};

use std::fs::File;
use std::path::PathBuf;

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};

use sam_ba_loader::{ChipProfile, Options, Programmer, ProgressCallbacks};

#[derive(Clone, Debug, StructOpt)]
pub struct Args {
    /// Serial port to connect to
    #[structopt(long, default_value = "/dev/ttyACM0")]
    port: String,

    /// Serial port baud rate
    #[structopt(long, default_value = "115200")]
    baud: usize,

    /// Firmware image (raw binary) to write
    #[structopt(long)]
    file: Option<PathBuf>,

    /// Print the detected chip and exit
    #[structopt(long)]
    info: bool,

    /// Boot from the ROM monitor instead of flash
    #[structopt(long)]
    boot_rom: bool,

    #[structopt(flatten)]
    options: Options,

    /// Log level for console output
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,
}

struct PageProgress {
    bar: ProgressBar,
}

impl ProgressCallbacks for PageProgress {
    fn init(&mut self, addr: u32, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_message(&format!("0x{:08x}", addr));
    }

    fn update(&mut self, current: usize) {
        self.bar.set_position(current as u64);
    }

    fn finish(&mut self) {
        self.bar.finish_with_message("Write complete");
    }
}

fn describe(chip: &ChipProfile) {
    info!("Chip: {} (id: {})", chip.name, hex::encode(chip.id.to_be_bytes()));
    info!(
        "Flash: {} at 0x{:08x} ({} pages of {} bytes, {} plane(s), {} lock regions)",
        bytefmt::format(chip.capacity()),
        chip.flash_base,
        chip.pages,
        chip.page_size,
        chip.planes,
        chip.lock_regions
    );
}

fn main() -> anyhow::Result<()> {
    // Parse out arguments
    let mut o = Args::from_args();

    // Configure logger
    let _ = SimpleLogger::init(o.log_level, Config::default());

    // Boot source is handled explicitly below
    if o.boot_rom {
        o.options.no_boot_flash = true;
    }

    info!("Connecting to serial port");

    let mut p = Programmer::linux(&o.port, o.baud, o.options.clone())
        .with_context(|| format!("Error connecting to serial port {}", o.port))?;

    info!("Connecting to monitor");

    let chip = p.init().context("Error connecting to monitor")?;
    describe(chip);

    if o.info {
        return Ok(());
    }

    if let Some(path) = &o.file {
        let file = File::open(path).with_context(|| format!("Error opening {:?}", path))?;
        let size = file.metadata()?.len();

        info!("Writing {} ({})", path.display(), bytefmt::format(size));

        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} pages ({eta})")
                .progress_chars("#>-"),
        );
        let mut progress = PageProgress { bar };

        if let Err(e) = p.program(file, size, Some(&mut progress)) {
            progress.bar.abandon();
            error!("Programming failed: {}", e);
            return Err(e.into());
        }
    }

    if o.boot_rom {
        p.set_boot_flash(false)
            .context("Error setting boot source")?;
    }

    info!("Done");

    Ok(())
}
