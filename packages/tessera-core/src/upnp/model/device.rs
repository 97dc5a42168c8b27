//! Detected devices.

use std::sync::Arc;

use serde::Serialize;

use super::service::Service;
use crate::upnp::detection::{DetectionGate, DetectionStatus};

/// Identity fields from a `<device>` element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub udn: String,
    #[serde(rename = "deviceType")]
    pub device_type: String,
    #[serde(rename = "friendlyName")]
    pub friendly_name: String,
    pub manufacturer: String,
    #[serde(rename = "modelName")]
    pub model_name: String,
    #[serde(rename = "presentationUrl")]
    pub presentation_url: Option<String>,
}

/// A device tree node: identity, services, embedded devices, detection gate.
///
/// The service list is fixed when the description is parsed; service
/// schemas are filled in as they resolve.
pub struct Device {
    usn: String,
    location: String,
    info: DeviceInfo,
    services: Vec<Arc<Service>>,
    embedded: Vec<Arc<Device>>,
    detection: Arc<DetectionGate>,
}

impl Device {
    pub fn new(
        usn: impl Into<String>,
        location: impl Into<String>,
        info: DeviceInfo,
        services: Vec<Arc<Service>>,
        embedded: Vec<Arc<Device>>,
        detection: Arc<DetectionGate>,
    ) -> Self {
        Self {
            usn: usn.into(),
            location: location.into(),
            info,
            services,
            embedded,
            detection,
        }
    }

    /// USN of the registration entry this device was detected from
    /// (the UDN for embedded devices).
    pub fn usn(&self) -> &str {
        &self.usn
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn udn(&self) -> &str {
        &self.info.udn
    }

    pub fn device_type(&self) -> &str {
        &self.info.device_type
    }

    pub fn friendly_name(&self) -> &str {
        &self.info.friendly_name
    }

    pub fn services(&self) -> &[Arc<Service>] {
        &self.services
    }

    pub fn embedded_devices(&self) -> &[Arc<Device>] {
        &self.embedded
    }

    pub fn detection(&self) -> &Arc<DetectionGate> {
        &self.detection
    }

    pub fn detection_status(&self) -> DetectionStatus {
        self.detection.status()
    }

    /// This device followed by every embedded device, depth-first.
    pub fn all_devices(self: &Arc<Self>) -> Vec<Arc<Device>> {
        let mut out = vec![Arc::clone(self)];
        for child in &self.embedded {
            out.extend(child.all_devices());
        }
        out
    }

    /// Services of this device and of every embedded device.
    pub fn all_services(&self) -> Vec<Arc<Service>> {
        let mut out: Vec<Arc<Service>> = self.services.clone();
        for child in &self.embedded {
            out.extend(child.all_services());
        }
        out
    }

    /// Finds a service of this tree by full service ID, short ID or service type.
    pub fn find_service(&self, key: &str) -> Option<Arc<Service>> {
        self.all_services().into_iter().find(|s| {
            s.service_id() == key || s.short_id() == key || s.service_type() == key
        })
    }

    /// Serializable view for the HTTP API.
    pub fn summary(&self) -> DeviceSummary {
        DeviceSummary {
            usn: self.usn.clone(),
            location: self.location.clone(),
            info: self.info.clone(),
            detection: self.detection_status(),
            services: self
                .services
                .iter()
                .map(|s| ServiceSummary {
                    service_id: s.service_id().to_string(),
                    service_type: s.service_type().to_string(),
                    control_url: s.control_url().to_string(),
                    event_sub_url: s.event_sub_url().to_string(),
                    subscribed: s.is_subscribed(),
                    actions: s.actions().iter().map(|a| a.name.clone()).collect(),
                })
                .collect(),
            embedded: self.embedded.iter().map(|d| d.summary()).collect(),
        }
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("usn", &self.usn)
            .field("udn", &self.info.udn)
            .field("device_type", &self.info.device_type)
            .field("services", &self.services.len())
            .field("embedded", &self.embedded.len())
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceSummary {
    #[serde(rename = "serviceId")]
    pub service_id: String,
    #[serde(rename = "serviceType")]
    pub service_type: String,
    #[serde(rename = "controlUrl")]
    pub control_url: String,
    #[serde(rename = "eventSubUrl")]
    pub event_sub_url: String,
    pub subscribed: bool,
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    pub usn: String,
    pub location: String,
    #[serde(flatten)]
    pub info: DeviceInfo,
    pub detection: DetectionStatus,
    pub services: Vec<ServiceSummary>,
    pub embedded: Vec<DeviceSummary>,
}
