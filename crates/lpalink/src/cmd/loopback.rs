use std::sync::Arc;
use std::time::Duration;

use lpalink_replay::{GatewayStats, LoopbackGateway, PortMap, StopSignal};
use lpalink_transport::{SharedTransport, TransportConfig, UnixDomainSocket};
use tracing::info;

use crate::cmd::{install_ctrlc_handler, LoopbackArgs};
use crate::exit::{replay_error, transport_error, CliResult, SUCCESS};
use crate::output::{print_gateway_stats, OutputFormat};

const ACCEPT_POLL: Duration = Duration::from_millis(100);

pub fn run(args: LoopbackArgs, format: OutputFormat) -> CliResult<i32> {
    let ports = args
        .routes
        .iter()
        .fold(PortMap::identity(), |ports, &(from, to)| ports.with_route(from, to));
    let socket = UnixDomainSocket::bind(&args.path, TransportConfig::non_blocking())
        .map_err(|err| transport_error("bind failed", err))?;

    let stop = StopSignal::new();
    install_ctrlc_handler(stop.clone())?;

    let mut total = GatewayStats::default();
    while !stop.is_stopped() && args.count.map_or(true, |count| total.forwarded < count) {
        let Some(endpoint) = socket
            .accept_timeout(ACCEPT_POLL)
            .map_err(|err| transport_error("accept failed", err))?
        else {
            continue;
        };
        info!("client connected");

        let gateway = LoopbackGateway::new(Arc::new(SharedTransport::new(endpoint)), ports.clone());
        let remaining = args.count.map(|count| count - total.forwarded);
        let stats = gateway
            .serve(&stop, remaining)
            .map_err(|err| replay_error("gateway failed", err))?;
        total.forwarded += stats.forwarded;
        total.rejected += stats.rejected;
    }

    print_gateway_stats(&total, format);
    Ok(SUCCESS)
}
