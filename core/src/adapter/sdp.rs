// SDP service record

use uuid::Uuid;

/// Advertised service name
pub const SERVICE_NAME: &str = "NeuChar-RFCOMM-Service";

/// Service Discovery Protocol record for the provisioning channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub uuid: Uuid,
    pub channel: u8,
    pub name: String,
}

impl ServiceRecord {
    pub fn new(uuid: Uuid, channel: u8) -> Self {
        Self {
            uuid,
            channel,
            name: SERVICE_NAME.to_string(),
        }
    }

    /// BlueZ XML form: service class (0x0001), L2CAP/RFCOMM protocol
    /// descriptor with the channel (0x0004), and service name (0x0100)
    pub fn to_xml(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" ?>
<record>
    <attribute id="0x0001">
        <sequence>
            <uuid value="{uuid}" />
        </sequence>
    </attribute>
    <attribute id="0x0004">
        <sequence>
            <sequence>
                <uuid value="0x0100" />
            </sequence>
            <sequence>
                <uuid value="0x0003" />
                <uint8 value="{channel}" />
            </sequence>
        </sequence>
    </attribute>
    <attribute id="0x0100">
        <text value="{name}" />
    </attribute>
</record>
"#,
            uuid = self.uuid,
            channel = self.channel,
            name = xml_escape(&self.name),
        )
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
