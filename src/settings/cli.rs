use super::Parser;

#[derive(Parser, Debug)]
#[command(name = "mangahub", about = "mangahub authentication server")]
pub struct Cli {
    /// Path to a settings TOML file. Defaults to the build profile's file.
    #[arg(long)]
    pub settings: Option<String>,
}
