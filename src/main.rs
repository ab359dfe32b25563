//! `smaf825` command line: play SMAF files on a YMF825, dump their contents.

mod cli {
    use std::path::PathBuf;
    use std::thread;
    use std::time::Duration;

    use anyhow::{bail, Context, Result};
    use clap::{Args, Parser, Subcommand};
    use log::LevelFilter;

    use smaf825::sequencer::baud_rate_list;
    use smaf825::voice::{Vm35FmVersion, Vm35FmVoice};
    use smaf825::{
        load_file, CommandTransport, LoadedFile, PlayOptions, Sequencer, Synthesizer,
    };

    /// Slap bass used by the `tone` command
    const TEST_TONE: [u8; 31] = [
        0x00, 0x00, 0x43, //
        0x23, 0x37, 0xF2, 0x3A, 0x44, 0x10, 0x03, //
        0x63, 0x66, 0xF4, 0x54, 0x44, 0x90, 0x00, //
        0x23, 0x69, 0xC2, 0x62, 0x44, 0x10, 0x00, //
        0xF3, 0x82, 0xFF, 0x0C, 0x44, 0x10, 0x00,
    ];

    #[derive(Parser)]
    #[command(name = "smaf825", version)]
    #[command(about = "Plays SMAF files on a YMF825 board through a serial bridge")]
    struct Cli {
        #[command(subcommand)]
        command: Command,
    }

    #[derive(Subcommand)]
    enum Command {
        /// Plays SMAF format files (.mmf|.spf)
        #[command(alias = "p")]
        Play(PlayArgs),
        /// Dumps SMAF format files (.mmf|.spf|.vma|.vm3|.vm5)
        #[command(alias = "d")]
        Dump(DumpArgs),
        /// Plays a test scale on channel 0
        Tone(ToneArgs),
    }

    #[derive(Args)]
    struct LogArgs {
        /// Show debug messages
        #[arg(short, long)]
        debug: bool,
        /// Suppress information messages
        #[arg(short, long)]
        quiet: bool,
        /// Do not output any messages
        #[arg(short = 'Q', long)]
        silent: bool,
    }

    impl LogArgs {
        fn init(&self) {
            let level = if self.debug {
                LevelFilter::Debug
            } else if self.silent {
                LevelFilter::Off
            } else if self.quiet {
                LevelFilter::Warn
            } else {
                LevelFilter::Info
            };
            env_logger::Builder::new()
                .filter_level(level)
                .parse_default_env()
                .init();
        }
    }

    #[derive(Args)]
    struct PlayArgs {
        /// Serial device (`/dev/null` or `--` for a dry run)
        device: String,
        /// Song file
        file: PathBuf,
        /// Show state
        #[arg(short, long)]
        state: bool,
        /// Master volume (0..63)
        #[arg(short, long, default_value_t = 48)]
        volume: u8,
        /// Analog gain (0..3)
        #[arg(short, long, default_value_t = 1)]
        gain: u8,
        /// SeqVol (0..31)
        #[arg(short = 'V', long, default_value_t = 16)]
        seqvol: u8,
        /// Loop count (0: infinite)
        #[arg(short, long = "loop", default_value_t = 1)]
        loop_count: u32,
        /// Baud rate
        #[arg(short = 'r', long, default_value_t = 57600, help = format!("Baud rate {}", baud_rate_list()))]
        baudrate: u32,
        #[command(flatten)]
        log: LogArgs,
    }

    #[derive(Args)]
    struct DumpArgs {
        /// File to dump
        file: PathBuf,
        /// Dumps in JSON format
        #[arg(short, long)]
        json: bool,
        /// Dumps voice data only
        #[arg(short, long)]
        voice: bool,
        /// Dumps exclusives only
        #[arg(short = 'x', long)]
        exclusive: bool,
        #[command(flatten)]
        log: LogArgs,
    }

    #[derive(Args)]
    struct ToneArgs {
        /// Serial device
        device: String,
        /// Baud rate
        #[arg(short = 'r', long, default_value_t = 57600)]
        baudrate: u32,
        #[command(flatten)]
        log: LogArgs,
    }

    fn play(args: PlayArgs) -> Result<()> {
        args.log.init();
        let options = PlayOptions {
            loop_count: args.loop_count,
            master_volume: args.volume,
            analog_gain: args.gain,
            seq_vol: args.seqvol,
            baud_rate: args.baudrate,
            show_state: args.state,
        };
        options.validate()?;

        let file = match load_file(&args.file)
            .with_context(|| format!("loading {}", args.file.display()))?
        {
            LoadedFile::Smaf(file) => file,
            LoadedFile::VoiceLibrary(_) => bail!("{} is not a song", args.file.display()),
        };

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        ctrlc::set_handler(move || {
            let _ = stop_tx.try_send(());
        })
        .context("installing Ctrl-C handler")?;

        let mut transport = CommandTransport::open(&args.device, options.baud_rate)
            .with_context(|| format!("opening {}", args.device))?;
        Sequencer::new()
            .play(&file, &mut transport, &options, &stop_rx)
            .context("playing")?;
        transport.close();
        Ok(())
    }

    fn dump(args: DumpArgs) -> Result<()> {
        args.log.init();
        let loaded = load_file(&args.file)
            .with_context(|| format!("loading {}", args.file.display()))?;

        let file = match &loaded {
            LoadedFile::Smaf(file) if args.voice || args.exclusive => file,
            _ => return print(&loaded, args.json),
        };
        if args.voice {
            let voices = file.collect_voices();
            if args.json {
                println!("{}", serde_json::to_string_pretty(&voices)?);
            } else {
                for voice in &voices {
                    println!("{voice}");
                }
            }
        } else {
            let exclusives = file.collect_exclusives();
            if args.json {
                println!("{}", serde_json::to_string_pretty(&exclusives)?);
            } else {
                for ex in &exclusives {
                    println!("{ex}");
                }
            }
        }
        Ok(())
    }

    fn print(loaded: &LoadedFile, json: bool) -> Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(loaded)?);
        } else {
            println!("{loaded}");
        }
        Ok(())
    }

    fn tone(args: ToneArgs) -> Result<()> {
        args.log.init();
        let voice = Vm35FmVoice::parse(&TEST_TONE, Vm35FmVersion::Vm5)?;
        let mut sp = CommandTransport::open(&args.device, args.baudrate)
            .with_context(|| format!("opening {}", args.device))?;

        let ch = 0;
        sp.send_all_off();
        sp.send_tones(&[voice]);
        sp.send_mute_and_eg_reset(ch);
        sp.send_volume(ch, 28, true);
        sp.send_vibrato(ch, 0);
        sp.send_fine_tune(ch, 1, 0);
        for octave in 1..4 {
            for step in [0, 2, 4, 5, 7, 9, 11] {
                sp.send_key_on(ch, octave * 12 + step, 0.0, 21, 0);
                sp.flush();
                thread::sleep(Duration::from_millis(200));
                sp.send_key_off(ch, 0);
                sp.flush();
                thread::sleep(Duration::from_millis(100));
            }
        }
        sp.send_terminate();
        while !sp.flush() {
            thread::sleep(Duration::from_millis(1));
        }
        sp.close();
        Ok(())
    }

    pub fn run() -> Result<()> {
        match Cli::parse().command {
            Command::Play(args) => play(args),
            Command::Dump(args) => dump(args),
            Command::Tone(args) => tone(args),
        }
    }
}

fn main() -> anyhow::Result<()> {
    cli::run()
}
