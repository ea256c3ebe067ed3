use crate::audio::AudioHw;
use crate::audio::params::Params;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;

const MAX_DATAGRAM: usize = 1024;

/// UDP front-end for `set_parameters` / `get_parameters`.
///
/// Every datagram is a parameter string. It is applied with
/// `set_parameters` and answered with `status=<errno>` followed by the
/// current values of the keys it named.
pub struct ControlBridge {
    socket: UdpSocket,
    hw: Arc<AudioHw>,
}

impl ControlBridge {
    pub async fn new(port: u16, hw: Arc<AudioHw>) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(("127.0.0.1", port)).await?;
        log::info!("Control bridge listening on {}", socket.local_addr()?);
        Ok(Self { socket, hw })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (len, peer) = self.socket.recv_from(&mut buf).await?;
            let Ok(request) = std::str::from_utf8(&buf[..len]) else {
                log::warn!("Dropping non-UTF-8 datagram from {}", peer);
                continue;
            };
            let request = request.trim().to_string();
            if request.is_empty() {
                continue;
            }
            log::debug!("{} -> {}", peer, request);

            // set_parameters may join the SCO threads
            let hw = self.hw.clone();
            let reply = tokio::task::spawn_blocking(move || handle_request(&hw, &request)).await?;
            self.socket.send_to(reply.as_bytes(), peer).await?;
        }
    }
}

/// Apply one request and build its reply.
pub fn handle_request(hw: &AudioHw, request: &str) -> String {
    let status = match hw.set_parameters(request) {
        Ok(()) => 0,
        Err(e) => {
            log::warn!("set_parameters({}) failed: {}", request, e);
            e.errno()
        }
    };

    let query = Params::parse(request).keys().collect::<Vec<_>>().join(";");
    let values = hw.get_parameters(&query);

    let mut reply = format!("status={}", status);
    if !values.is_empty() {
        reply.push(';');
        reply.push_str(&values);
    }
    reply
}
