use clap::{
    ArgAction, Args, Parser,
    builder::{PossibleValuesParser, TypedValueParser},
};
use psfvm::scheduler::Pacing;
use std::path::PathBuf;
use strum::VariantNames;

/// Upper bound of `--batch`, a few frames worth of instructions.
pub const MAX_BATCH: i64 = 1 << 20;

fn clap_styles() -> clap::builder::Styles {
    use clap::builder::styling::{AnsiColor, Color, Style};
    clap::builder::Styles::styled()
        .header(
            Style::new()
                .bold()
                .underline()
                .fg_color(Some(Color::Ansi(AnsiColor::Green))),
        )
        .usage(
            Style::new()
                .bold()
                .underline()
                .fg_color(Some(Color::Ansi(AnsiColor::Green))),
        )
        .literal(Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightMagenta))))
        .invalid(Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightRed))))
        .error(
            Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Red))),
        )
        .placeholder(Style::new().fg_color(Some(Color::Ansi(AnsiColor::White))))
}

#[derive(Debug, Args)]
pub struct CliArgs {
    /// How to pace execution.
    #[arg(
        short,
        long,
        default_value = "throughput",
        value_parser = PossibleValuesParser::new(Pacing::VARIANTS).try_map(|s| s.parse::<Pacing>())
    )]
    pub pacing: Pacing,
    /// Stop after this many frames.
    #[arg(short, long, default_value_t = 300)]
    pub frames: u64,
    /// Package whose debug tags are loaded before running and saved afterwards.
    #[arg(short, long)]
    pub tags: Option<String>,
    /// Directory where debug tags are stored.
    #[arg(long)]
    pub tags_dir: Option<PathBuf>,
    /// Whether reverb is enabled.
    #[arg(long, default_value_t = false, action = ArgAction::Set)]
    pub reverb: bool,
    /// Single steps to perform before running.
    #[arg(short, long, default_value_t = 0)]
    pub step: u32,
    /// Instructions executed by the demo core per batch.
    #[arg(long, default_value_t = 512, value_parser = clap::value_parser!(u32).range(1..=MAX_BATCH))]
    pub batch: u32,
}

/// psfvm iop scheduler demo
#[derive(Debug, Parser)]
#[command(name = "psfvm")]
#[command(styles = clap_styles())]
pub struct Cli {
    #[command(flatten)]
    pub args: CliArgs,
}

#[cfg(test)]
mod test {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn batch_is_bounded() {
        let cli = Cli::try_parse_from(["psfvm", "--batch", "1024"]).unwrap();
        assert_eq!(cli.args.batch, 1024);

        assert!(Cli::try_parse_from(["psfvm", "--batch", "0"]).is_err());
        assert!(Cli::try_parse_from(["psfvm", "--batch", "2147483648"]).is_err());
    }

    #[test]
    fn pacing_parses_by_name() {
        let cli = Cli::try_parse_from(["psfvm", "--pacing", "stepped"]).unwrap();
        assert_eq!(cli.args.pacing, Pacing::Stepped);
        assert!(Cli::try_parse_from(["psfvm", "--pacing", "fast"]).is_err());
    }
}
