use anyhow::Result;

mod capture;
mod cli;

fn main() -> Result<()> {
    cli::execute()
}
