use anyhow::Context;

fn main() -> anyhow::Result<()> {
    docmove::run().context("docmove failed")
}
