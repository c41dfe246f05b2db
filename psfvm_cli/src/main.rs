mod cli;
mod demo;

use clap::Parser;
use cli::Cli;
use crossbeam::sync::{Parker, Unparker};
use easyerr::{Error, ResultExt};
use log::{error, info};
use parking_lot::Mutex;
use psfvm::{
    Config, Vm, VmError,
    audio::Silent,
    clock::SystemClock,
    iop::Interrupt,
    machine::Status,
    mailbox::MailboxError,
    notify::Event,
    tags::TagsError,
};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

const AUDIO_BUFFERS: usize = 4;
const LOOP_LENGTH: u32 = 0x400;
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
enum AppError {
    #[error("vm error")]
    Vm { source: VmError },
    #[error("lost contact with the scheduler")]
    Mailbox { source: MailboxError },
}

/// Frame statistics, updated from the scheduler thread.
struct FrameCounter {
    total: u64,
    target: u64,
    window_start: Instant,
    window_frames: u64,
    unparker: Unparker,
}

impl FrameCounter {
    fn new_frame(&mut self) {
        self.total += 1;
        self.window_frames += 1;
        if self.total == self.target {
            self.unparker.unpark();
        }
    }

    /// Returns the frame rate since the last report and starts a new window.
    fn report(&mut self) -> f64 {
        let elapsed = self.window_start.elapsed().as_secs_f64();
        let fps = if elapsed > 0.0 {
            self.window_frames as f64 / elapsed
        } else {
            0.0
        };

        self.window_start = Instant::now();
        self.window_frames = 0;
        fps
    }
}

/// Performs `count` single steps, waiting for each to complete.
fn single_step(vm: &Vm, count: u32) -> Result<(), AppError> {
    for _ in 0..count {
        vm.step().context(AppCtx::Mailbox)?;
        loop {
            let snapshot = vm.snapshot().context(AppCtx::Mailbox)?;
            if snapshot.status == Status::Paused && !snapshot.single_step {
                break;
            }
        }
    }

    Ok(())
}

fn run(cli: Cli) -> Result<(), AppError> {
    let args = cli.args;
    let mut config = Config {
        pacing: args.pacing,
        ..Config::default()
    };
    if let Some(dir) = args.tags_dir {
        config.tags_dir = dir;
    }

    let clock = Arc::new(SystemClock);
    let audio = Silent::new(clock.clone(), AUDIO_BUFFERS, config.audio_update_interval);
    let core = demo::Spinner::new(LOOP_LENGTH, args.batch);
    let serviced = core.serviced();
    let vm = Vm::with_clock(config, core, audio, clock).context(AppCtx::Vm)?;

    if let Some(package) = &args.tags {
        match vm.load_debug_tags(package) {
            Ok(()) => info!("loaded debug tags of {package}"),
            Err(VmError::Tags {
                source: TagsError::NotFound { .. },
            }) => info!("no debug tags stored for {package} yet"),
            Err(e) => return Err(e).context(AppCtx::Vm),
        }
    }

    vm.set_reverb_enabled(args.reverb)
        .context(AppCtx::Mailbox)?;
    single_step(&vm, args.step)?;

    let parker = Parker::new();
    let counter = Arc::new(Mutex::new(FrameCounter {
        total: 0,
        target: args.frames,
        window_start: Instant::now(),
        window_frames: 0,
        unparker: parker.unparker().clone(),
    }));
    let subscription = vm.subscribe(Event::NewFrame, {
        let counter = counter.clone();
        move || counter.lock().new_frame()
    });

    info!("running {} frames with {} pacing", args.frames, args.pacing);
    vm.resume().context(AppCtx::Mailbox)?;
    loop {
        parker.park_timeout(REPORT_INTERVAL);

        let mut counter = counter.lock();
        if counter.total >= counter.target {
            break;
        }

        if counter.window_start.elapsed() >= REPORT_INTERVAL {
            let fps = counter.report();
            info!("{fps:.1} fps ({} frames)", counter.total);
        }
    }

    vm.pause().context(AppCtx::Mailbox)?;
    vm.unsubscribe(subscription);

    let snapshot = vm.snapshot().context(AppCtx::Mailbox)?;
    info!(
        "stopped after {} frames ({} vblanks serviced), {} ticks into the next one",
        counter.lock().total,
        serviced.get(Interrupt::VBlank),
        snapshot.frame.period() - snapshot.frame.remaining()
    );

    if let Some(package) = &args.tags {
        vm.save_debug_tags(package).context(AppCtx::Vm)?;
        info!("saved debug tags of {package} to {}", vm.tags_dir().display());
    }

    vm.shutdown();
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        error!("{e}");

        let mut source = std::error::Error::source(&e);
        while let Some(cause) = source {
            error!("  caused by: {cause}");
            source = cause.source();
        }

        std::process::exit(1);
    }
}
