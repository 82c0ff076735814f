use tracing_subscriber::EnvFilter;

pub fn init(color: bool, json: bool, levels: &str) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(levels))
        .with_ansi(color)
        .with_writer(std::io::stderr);

    let result = if json {
        builder.json().flatten_event(true).try_init()
    } else {
        builder.try_init()
    };

    if let Err(error) = result {
        eprintln!("Unable to initialize logging: {}", error);
    }
}
