use core::error::Error;

use clap::Parser;
use tokio::runtime::Builder;
use volley::{
    cfg::Config,
    cmd::{Cmd, ModeCmd},
    dispatch::Dispatcher,
    server,
};

pub fn main() {
    let cmd = Cmd::parse();
    volley::logging::init(cmd.verbose as usize).unwrap();

    if let Err(err) = run(cmd) {
        log::error!("ERROR: {err}");
        std::process::exit(1);
    }
}

fn run(cmd: Cmd) -> Result<(), Box<dyn Error>> {
    match cmd.mode {
        ModeCmd::Run(cmd) => {
            let cfg: Config = cmd.try_into()?;
            let report = Dispatcher::new(cfg).run()?;

            println!("{report}");

            Ok(())
        }
        ModeCmd::Serve(cmd) => {
            Builder::new_current_thread()
                .enable_io()
                .enable_time()
                .thread_name("runtime")
                .build()?
                .block_on(server::run(cmd))?;

            Ok(())
        }
    }
}
