fn main() -> anyhow::Result<()> {
    let matches = scalecast::cli::parse_args();
    scalecast::boot::init_logging(matches.get_one::<String>("log-file").map(String::as_str));
    scalecast::cli::actions::run(&matches)
}
