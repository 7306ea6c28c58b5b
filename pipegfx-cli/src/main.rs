// In the long run this will hopefully become a convenient command for
// inspecting and driving a real display engine through its mapped register
// windows. For now it's a small test bed that runs the library against the
// simulated device, which is handy for checking divider choices and the
// exact register sequence a mode set produces.

use anyhow::anyhow;
use clap::{Parser, Subcommand, ValueEnum};
use pipegfx::clocks;
use pipegfx::config::{ClockFailurePolicy, Config, DisplayConfig, TimeoutPolicy};
use pipegfx::interface::fake::{FakeClock, FakeDevice, FakeInterface};
use pipegfx::models::plb::PLB;
use pipegfx::models::tnc::TNC;
use pipegfx::models::Model;
use pipegfx::plane::{Depth, Framebuffer};
use pipegfx::registers::Register;
use pipegfx::{Engine, ModeSet, Pipe, PortType, PowerState, TimingDescriptor};

#[derive(Debug, Parser)]
#[command(about = "Exercise the pipegfx mode-setting library against a simulated device.")]
struct Cli {
    /// Hardware family to model
    #[arg(short, long, value_enum, default_value_t = ModelArg::Tnc)]
    model: ModelArg,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Find PLL divisors for a dot clock and show how they're encoded
    Clock {
        /// Requested dot clock in kHz
        target_khz: u32,

        #[arg(short, long, value_enum, default_value_t = PortArg::Sdvo)]
        port: PortArg,

        /// Largest acceptable error in parts per million
        #[arg(short, long, default_value_t = 5_000)]
        tolerance_ppm: u32,

        /// Reference clock in kHz, instead of the model's own
        #[arg(long)]
        ref_khz: Option<u32>,
    },

    /// Run a full enable sequence and print every register write
    Modeset {
        #[arg(long, value_enum, default_value_t = PipeArg::B)]
        pipe: PipeArg,

        #[arg(short, long, value_enum, default_value_t = PortArg::Sdvo)]
        port: PortArg,

        #[arg(long, value_enum, default_value_t = ModeArg::Vga)]
        mode: ModeArg,

        /// Run the named legacy VGA mode number instead
        #[arg(long, value_parser = parse_u16)]
        vga_mode: Option<u16>,

        /// Silicon revision (PCI revision ID)
        #[arg(short, long, default_value_t = 0)]
        revision: u8,

        #[arg(long, value_enum, default_value_t = DisplayArg::Single)]
        display: DisplayArg,

        /// Substitute the fallback clock when synthesis misses
        #[arg(long)]
        fallback: bool,

        /// Log hardware timeouts instead of failing
        #[arg(long)]
        lenient: bool,

        /// Make the simulated CRC unit disagree until htotal reaches this
        #[arg(long)]
        good_htotal: Option<u16>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModelArg {
    Plb,
    Tnc,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PortArg {
    Lvds,
    Sdvo,
}

impl From<PortArg> for PortType {
    fn from(v: PortArg) -> Self {
        match v {
            PortArg::Lvds => PortType::Lvds,
            PortArg::Sdvo => PortType::Sdvo,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PipeArg {
    A,
    B,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Vga,
    Svga,
    Xga,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DisplayArg {
    Single,
    SingleTvOut,
    Clone,
    Extended,
}

fn parse_u16(s: &str) -> Result<u16, std::num::ParseIntError> {
    match s.strip_prefix("0x") {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    match cli.model {
        ModelArg::Plb => run(PLB, cli.command),
        ModelArg::Tnc => run(TNC, cli.command),
    }
}

fn run<M: Model>(model: M, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Clock {
            target_khz,
            port,
            tolerance_ppm,
            ref_khz,
        } => show_clock::<M>(target_khz, port.into(), tolerance_ppm, ref_khz),
        Command::Modeset {
            pipe,
            port,
            mode,
            vga_mode,
            revision,
            display,
            fallback,
            lenient,
            good_htotal,
        } => {
            let mut config = Config::new();
            config.revision(revision).display_config(match display {
                DisplayArg::Single => DisplayConfig::Single,
                DisplayArg::SingleTvOut => DisplayConfig::SingleTvOut,
                DisplayArg::Clone => DisplayConfig::Clone,
                DisplayArg::Extended => DisplayConfig::Extended,
            });
            if fallback {
                config.clock_policy(ClockFailurePolicy::UseFallback);
            }
            if lenient {
                config.timeout_policy(TimeoutPolicy::LogAndContinue);
            }
            let base = match mode {
                ModeArg::Vga => TimingDescriptor::MODE_640X480_60,
                ModeArg::Svga => TimingDescriptor::MODE_800X600_60,
                ModeArg::Xga => TimingDescriptor::MODE_1024X768_60,
            };
            let timing = match vga_mode {
                Some(n) => TimingDescriptor::legacy_vga(n, base),
                None => base,
            };
            let pipe = match pipe {
                PipeArg::A => Pipe::A,
                PipeArg::B => Pipe::B,
            };
            modeset(model, config, pipe, port.into(), timing, good_htotal)
        }
    }
}

fn show_clock<M: Model>(
    target_khz: u32,
    port: PortType,
    tolerance_ppm: u32,
    ref_khz: Option<u32>,
) -> anyhow::Result<()> {
    let ref_khz = ref_khz.unwrap_or_else(|| M::ref_freq_khz(port));
    let params = clocks::synthesize::<M>(target_khz, ref_khz, port, tolerance_ppm)
        .map_err(|e| anyhow!("{}", e))?;
    let regs = params
        .encode::<M>(port)
        .ok_or_else(|| anyhow!("{} can't encode these divisors for {:?}", M::NAME, port))?;
    println!("{} {:?}, reference {} kHz", M::NAME, port, ref_khz);
    println!(
        "m={} n={} p1={} p2={}",
        params.m, params.n, params.p1, params.p2
    );
    println!(
        "dot clock {} kHz ({} ppm)",
        params.dot_clock_khz,
        clocks::error_ppm(params.dot_clock_khz, target_khz)
    );
    println!("DPLL {:#010x}  FP0 {:#010x}", regs.dpll, regs.fp);
    Ok(())
}

fn modeset<M: Model>(
    model: M,
    config: Config,
    pipe: Pipe,
    port: PortType,
    mut timing: TimingDescriptor,
    good_htotal: Option<u16>,
) -> anyhow::Result<()> {
    let dev = FakeDevice::new(model);
    dev.set_crc_good_htotal(good_htotal);
    let mut surfaces = dev.surfaces();
    let mut driver = dev.port_driver();
    let mut eng: Engine<M, FakeInterface, FakeClock> =
        Engine::new(dev.interface(), dev.clock(), config);

    let stride = (timing.width as u32 * 4 + 63) & !63;
    let report = eng
        .mode_set(
            pipe,
            ModeSet::On {
                port,
                timing: &mut timing,
                framebuffer: Framebuffer::new(0x0010_0000, stride, Depth::Bpp32),
            },
            &mut surfaces,
        )
        .map_err(|e| anyhow!("mode set failed: {}", e))?;
    eng.program_port(pipe, port, PowerState::On, &mut driver)
        .map_err(|e| anyhow!("port enable failed: {}", e))?;
    eng.post_program_port(pipe, port, PowerState::On)
        .map_err(|e| anyhow!("port fixups failed: {}", e))?;

    for w in dev.writes() {
        let name = match Register::decode(w.offset) {
            Some((reg, Some(p))) => format!("{:?}[{:?}]", reg, p),
            Some((reg, None)) => format!("{:?}", reg),
            None => format!("{:#07x}", w.offset),
        };
        println!("{:?} {:<16} <- {:#010x}", w.aperture, name, w.value);
    }
    println!();
    if let Some(clock) = report.clock {
        println!(
            "clock m={} n={} p1={} p2={} -> {} kHz{}",
            clock.m,
            clock.n,
            clock.p1,
            clock.p2,
            clock.dot_clock_khz,
            if report.fallback_clock {
                " (fallback)"
            } else {
                ""
            }
        );
    }
    println!(
        "tuning {:?} after {} retries",
        report.tuning, report.tuning_iterations
    );
    if timing.reserved.tuned {
        println!(
            "tuned htotal {} (offset {})",
            timing.reserved.htotal as u32 + 1,
            timing.reserved.delta
        );
    }
    println!("state {:?}", eng.read_pipe_state(pipe).map_err(|e| anyhow!("{}", e))?);
    println!("{} us simulated", dev.now_us());
    Ok(())
}
