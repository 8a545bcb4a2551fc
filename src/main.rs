#[macro_use] extern crate log;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = postlog::Config::from_env().and_then(postlog::run) {
        error!("{}", e);
        std::process::exit(1);
    }
}
