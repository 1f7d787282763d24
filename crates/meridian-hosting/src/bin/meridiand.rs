//! `meridiand`：按配置运行一个路由实例，Ctrl-C 停机。
//!
//! 参数均可省略；参数错误时输出用法并以退出码 2 结束。

use std::process::ExitCode;

use anyhow::Context;
use meridian_core::{BootstrapOptions, ConfigError, Transport};
use meridian_hosting::{Host, install_tracing};
use tracing::{error, info};

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) => {
            if let Some(config) = failure.downcast_ref::<ConfigError>()
                && matches!(config, ConfigError::Usage { .. })
            {
                eprintln!("{config}");
                return ExitCode::from(2);
            }
            error!(error = %format!("{failure:#}"), "meridiand terminated");
            eprintln!("meridiand: {failure:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<()> {
    let options = BootstrapOptions::from_args(std::env::args().skip(1))?;
    let config = options.resolve().context("加载配置失败")?;
    install_tracing(&config.logging.filter).context("安装日志失败")?;

    let host = Host::build(&config).context("装配路由实例失败")?;
    for transport in host.transports() {
        info!(endpoint = %transport.local_endpoint(), "listening");
    }
    host.stop_on_ctrl_c();
    host.run().context("运行路由实例失败")?;
    Ok(())
}
