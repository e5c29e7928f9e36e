use clap::Parser;

fn main() -> anyhow::Result<()> {
    presence_ledger_lib::run(presence_ledger_lib::Cli::parse())
}
