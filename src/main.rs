fn main() -> anyhow::Result<()> {
    fiscal_bridge::run()
}
