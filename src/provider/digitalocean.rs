//! DigitalOcean droplet API 客户端

use log::debug;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;

use super::{AddressKind, CreateRequest, Instance, ListFilter, NetworkInterface, Provider, ProviderError};

const API_BASE: &str = "https://api.digitalocean.com/v2";
const PAGE_SIZE: u32 = 200;

#[derive(Debug, Deserialize)]
struct Droplet {
    id: u64,
    name: String,
    status: String,
    #[serde(default)]
    networks: Networks,
}

#[derive(Debug, Default, Deserialize)]
struct Networks {
    #[serde(default)]
    v4: Vec<NetworkV4>,
}

#[derive(Debug, Deserialize)]
struct NetworkV4 {
    ip_address: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct DropletEnvelope {
    droplet: Droplet,
}

#[derive(Debug, Deserialize)]
struct DropletPage {
    droplets: Vec<Droplet>,
    #[serde(default)]
    links: Links,
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    #[serde(default)]
    pages: Pages,
}

#[derive(Debug, Default, Deserialize)]
struct Pages {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

impl From<Droplet> for Instance {
    fn from(d: Droplet) -> Self {
        let networks = d
            .networks
            .v4
            .into_iter()
            .filter_map(|n| {
                let kind = match n.kind.as_str() {
                    "public" => AddressKind::Public,
                    "private" => AddressKind::Private,
                    _ => return None,
                };
                Some(NetworkInterface {
                    kind,
                    ip_address: n.ip_address,
                })
            })
            .collect();
        Instance {
            id: d.id,
            name: d.name,
            status: d.status,
            networks,
        }
    }
}

/// 基于 Bearer token 的 droplet 接口客户端
#[derive(Debug, Clone)]
pub struct DigitalOceanProvider {
    client: Client,
    token: String,
    base: String,
}

impl DigitalOceanProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base(token, API_BASE)
    }

    /// 指定其他 API 根地址
    pub fn with_base(token: impl Into<String>, base: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            token: token.into(),
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    async fn check(response: Response) -> Result<Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = match response.json::<ApiError>().await {
            Ok(body) => body.message,
            Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
        };
        Err(ProviderError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

impl Provider for DigitalOceanProvider {
    async fn list(&self, filter: &ListFilter) -> Result<Vec<Instance>, ProviderError> {
        let mut url = format!("{}/droplets?page=1&per_page={}", self.base, PAGE_SIZE);
        let mut instances = Vec::new();
        loop {
            let response = self.client.get(&url).bearer_auth(&self.token).send().await?;
            let page: DropletPage = Self::check(response).await?.json().await?;
            instances.extend(
                page.droplets
                    .into_iter()
                    .map(Instance::from)
                    .filter(|i| filter.matches(i)),
            );
            match page.links.pages.next {
                Some(next) => url = next,
                None => break,
            }
        }
        debug!("Listed {} matching droplets", instances.len());
        Ok(instances)
    }

    async fn create(&self, request: &CreateRequest) -> Result<Instance, ProviderError> {
        let response = self
            .client
            .post(format!("{}/droplets", self.base))
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await?;
        let envelope: DropletEnvelope = Self::check(response).await?.json().await?;
        Ok(envelope.droplet.into())
    }

    async fn get(&self, id: u64) -> Result<Instance, ProviderError> {
        let response = self
            .client
            .get(format!("{}/droplets/{}", self.base, id))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let envelope: DropletEnvelope = Self::check(response).await?.json().await?;
        Ok(envelope.droplet.into())
    }

    async fn delete(&self, id: u64) -> Result<(), ProviderError> {
        let response = self
            .client
            .delete(format!("{}/droplets/{}", self.base, id))
            .bearer_auth(&self.token)
            .send()
            .await?;
        // 已删除的实例视为成功
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(response).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_droplet_maps_tagged_addresses() {
        let json = r#"{"droplet":{"id":7,"name":"web3","status":"active","networks":{"v4":[
            {"ip_address":"10.0.0.5","type":"private"},
            {"ip_address":"203.0.113.9","type":"public"}]}}}"#;
        let envelope: DropletEnvelope = serde_json::from_str(json).unwrap();
        let instance = Instance::from(envelope.droplet);
        assert!(instance.is_active());
        assert_eq!(instance.address(AddressKind::Private), Some("10.0.0.5"));
        assert_eq!(instance.address(AddressKind::Public), Some("203.0.113.9"));
    }

    #[test]
    fn test_new_droplet_without_networks() {
        let json = r#"{"droplet":{"id":8,"name":"web4","status":"new"}}"#;
        let envelope: DropletEnvelope = serde_json::from_str(json).unwrap();
        let instance = Instance::from(envelope.droplet);
        assert!(!instance.is_active());
        assert!(matches!(
            instance.require_address(AddressKind::Public),
            Err(ProviderError::MissingAddress { id: 8, kind: AddressKind::Public })
        ));
    }
}
