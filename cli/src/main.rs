use clap::Parser;
use folio_cli::FolioCli;

fn main() -> anyhow::Result<()> {
    FolioCli::parse().run()
}
