//! `vigil create`: Create a container.
//!
//! On the engine this also starts the container; on the mini runtime the
//! container is left in the `created` state.

use clap::Args;
use vigil_common::config::VigilConfig;
use vigil_runtime::backend::CreateRequest;

use super::BackendArg;
use crate::output;

/// Arguments for the `create` command.
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Image reference.
    pub image: String,

    #[command(flatten)]
    pub backend: BackendArg,

    /// Container name.
    #[arg(long)]
    pub name: Option<String>,

    /// Port mapping `HOST:CONTAINER[/proto]`; repeatable.
    #[arg(short, long = "port", value_name = "HOST:CONTAINER")]
    pub ports: Vec<String>,

    /// CPU share, e.g. `0.5` for half a CPU.
    #[arg(long)]
    pub cpu: Option<f64>,

    /// Memory limit in MB.
    #[arg(long)]
    pub memory: Option<u64>,

    /// Request all GPUs (engine only).
    #[arg(long)]
    pub gpu: bool,
}

/// Splits `HOST:CONTAINER` into `(container, host)`.
fn parse_port(spec: &str) -> anyhow::Result<(String, String)> {
    match spec.split_once(':') {
        Some((host, container)) if !host.is_empty() && !container.is_empty() => {
            Ok((container.to_string(), host.to_string()))
        }
        _ => Err(anyhow::anyhow!(
            "invalid port mapping '{spec}', expected HOST:CONTAINER"
        )),
    }
}

impl CreateArgs {
    fn request(&self) -> anyhow::Result<CreateRequest> {
        let mut request = CreateRequest {
            cpu_limit: self.cpu,
            memory_limit: self.memory,
            gpu: self.gpu,
            ..CreateRequest::new(self.image.clone())
        };
        request.name.clone_from(&self.name);
        for spec in &self.ports {
            let (container, host) = parse_port(spec)?;
            request = request.port(container, host);
        }
        Ok(request)
    }
}

/// Executes the `create` command.
///
/// # Errors
///
/// Returns an error if arguments are invalid or creation fails.
pub async fn execute(config: &VigilConfig, args: &CreateArgs) -> anyhow::Result<()> {
    let request = args.request()?;
    let dispatcher = super::connect(config).await?;
    output::report(&dispatcher.create(args.backend.selector(), &request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_specs() {
        assert_eq!(
            parse_port("8080:80").unwrap(),
            ("80".to_string(), "8080".to_string())
        );
        assert_eq!(
            parse_port("5353:53/udp").unwrap(),
            ("53/udp".to_string(), "5353".to_string())
        );
        assert!(parse_port("8080").is_err());
        assert!(parse_port(":80").is_err());
    }

    #[test]
    fn request_from_args() {
        let args = CreateArgs {
            image: "nginx".into(),
            backend: BackendArg::default(),
            name: Some("web".into()),
            ports: vec!["8080:80".into()],
            cpu: Some(0.5),
            memory: Some(256),
            gpu: false,
        };
        let request = args.request().unwrap();
        assert_eq!(request.name.as_deref(), Some("web"));
        assert_eq!(request.ports.get("80").map(String::as_str), Some("8080"));
        assert_eq!(request.cpu_limit, Some(0.5));
        assert_eq!(request.memory_limit, Some(256));
    }
}
