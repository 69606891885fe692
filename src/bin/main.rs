use tiny_web_server::{logger, AppConfig, Result, Server};

fn main() -> Result<()> {
    let config = AppConfig::from_file("config.yaml")?;
    let _log_guard = logger::init(&config.server)?;
    config.display();

    let mut server = Server::new(&config)?;
    server.run();
    Ok(())
}
