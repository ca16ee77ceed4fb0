use gridpanel_error::PanelResult;
use gridpanel_gen2::Gen2Client;
use gridpanel_gen3::Gen3Client;
use gridpanel_models::{PanelCapability, PanelGeneration, PanelSnapshot};

/// A connected transport, one variant per hardware generation.
///
/// Operations shared by both transports live here; anything
/// transport-specific (token handling, relay writes, streaming callbacks) is
/// reached by matching on the variant or through [`PanelClient::as_gen2`] /
/// [`PanelClient::as_gen3`] after checking the capability set.
#[derive(Debug)]
pub enum PanelClient {
    Gen2(Gen2Client),
    Gen3(Gen3Client),
}

impl PanelClient {
    pub fn generation(&self) -> PanelGeneration {
        match self {
            PanelClient::Gen2(_) => PanelGeneration::Gen2,
            PanelClient::Gen3(_) => PanelGeneration::Gen3,
        }
    }

    pub fn capabilities(&self) -> PanelCapability {
        match self {
            PanelClient::Gen2(client) => client.capabilities(),
            PanelClient::Gen3(client) => client.capabilities(),
        }
    }

    /// Transport-agnostic snapshot. On G2 this fetches over the wire; on G3
    /// it is a pure read of the streamed reflection.
    pub async fn snapshot(&self) -> PanelResult<PanelSnapshot> {
        match self {
            PanelClient::Gen2(client) => client.snapshot().await,
            PanelClient::Gen3(client) => Ok(client.snapshot()),
        }
    }

    pub async fn ping(&self) -> bool {
        match self {
            PanelClient::Gen2(client) => client.ping().await,
            PanelClient::Gen3(client) => client.ping().await,
        }
    }

    pub async fn close(&self) {
        match self {
            PanelClient::Gen2(client) => client.close().await,
            PanelClient::Gen3(client) => client.close().await,
        }
    }

    pub fn as_gen2(&self) -> Option<&Gen2Client> {
        match self {
            PanelClient::Gen2(client) => Some(client),
            PanelClient::Gen3(_) => None,
        }
    }

    pub fn as_gen3(&self) -> Option<&Gen3Client> {
        match self {
            PanelClient::Gen3(client) => Some(client),
            PanelClient::Gen2(_) => None,
        }
    }
}
