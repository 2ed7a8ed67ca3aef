fn main() -> anyhow::Result<()> {
    stream_recorder_lib::run()
}
