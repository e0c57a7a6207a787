use clap::{Args, ValueEnum, ArgAction};

use crate::logging::LogLevel;

#[derive(Debug, Args)]
#[clap(name = "microvu-rec", version, disable_help_flag = true, disable_version_flag = true)]
#[clap(next_help_heading = "Global Options")]
pub struct GlobalOpts<Units>
where
    Units: ValueEnum + Send + Sync + 'static
{
    /// Only drive this vector unit (both run when omitted)
    #[clap(long, short, global = true, help_heading = "Select vector unit")]
    pub unit: Option<Units>,

    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    #[arg(long, short, action = ArgAction::Help)]
    help: (),

    #[arg(long, short('V'), action = ArgAction::Version)]
    version: (),
}

impl<Units> GlobalOpts<Units>
where
    Units: ValueEnum + Copy + PartialEq + Send + Sync + 'static
{
    /// True if `unit` was selected, or no unit was selected at all
    pub fn selects(&self, unit: Units) -> bool {
        self.unit.map_or(true, |u| u == unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
    enum Units {
        A,
        B,
    }

    #[derive(Parser)]
    #[command(version, disable_help_flag = true, disable_version_flag = true)]
    struct Cli {
        #[command(flatten)]
        global: GlobalOpts<Units>,
    }

    #[test]
    fn unit_selection() {
        let cli = Cli::parse_from(["test", "--unit", "b"]);
        assert!(cli.global.selects(Units::B));
        assert!(!cli.global.selects(Units::A));

        let cli = Cli::parse_from(["test"]);
        assert!(cli.global.selects(Units::A));
        assert!(cli.global.selects(Units::B));
        assert_eq!(cli.global.log_level, LogLevel::Info);
    }
}
