use std::{fmt::Display, time::Duration};

use vxi11_protocol::{CreateLinkParms, CreateLinkResp, DeviceError, LinkId, Procedure};

use crate::{
    context::CallContext,
    error::{Error, ErrorCode, check},
    transport::{Transport, invoke},
};

/// Highest primary or secondary GPIB address
pub const MAX_BUS_ADDRESS: u32 = 30;

/// Bus address of a device behind a controller.
///
/// Without a primary address the device is reached by the symbolic device name alone,
/// e.g. `inst0` of a LAN instrument.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct DeviceAddress {
    primary: Option<u32>,
    secondary: Option<u32>,
}

impl DeviceAddress {
    /// Address the device by its symbolic name only
    pub fn symbolic() -> DeviceAddress {
        DeviceAddress::default()
    }

    pub fn primary(primary: u32) -> DeviceAddress {
        DeviceAddress {
            primary: Some(primary),
            secondary: None,
        }
    }

    pub fn with_secondary(primary: u32, secondary: u32) -> DeviceAddress {
        DeviceAddress {
            primary: Some(primary),
            secondary: Some(secondary),
        }
    }

    /// Converts the conventional integer form where a negative value means "not used".
    pub fn from_raw(primary: i32, secondary: i32) -> DeviceAddress {
        DeviceAddress {
            primary: u32::try_from(primary).ok(),
            secondary: u32::try_from(secondary).ok(),
        }
    }

    pub fn primary_address(&self) -> Option<u32> {
        self.primary
    }

    pub fn secondary_address(&self) -> Option<u32> {
        self.secondary
    }

    /// The device name sent in `create_link`: `name`, `name,pad` or `name,pad,sad`.
    pub fn link_name(&self, device_name: &str) -> Result<String, Error> {
        match (self.primary, self.secondary) {
            (None, None) => Ok(device_name.to_string()),
            (None, Some(secondary)) => Err(Error::new(
                ErrorCode::InvalidAddress,
                format!("secondary address {} without primary address", secondary),
            )),
            (Some(primary), _) if primary > MAX_BUS_ADDRESS => Err(Error::new(
                ErrorCode::InvalidAddress,
                format!("primary address {} out of range", primary),
            )),
            (Some(_), Some(secondary)) if secondary > MAX_BUS_ADDRESS => Err(Error::new(
                ErrorCode::InvalidAddress,
                format!("secondary address {} out of range", secondary),
            )),
            (Some(primary), None) => Ok(format!("{},{}", device_name, primary)),
            (Some(primary), Some(secondary)) => {
                Ok(format!("{},{},{}", device_name, primary, secondary))
            }
        }
    }
}

impl Display for DeviceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.primary, self.secondary) {
            (Some(primary), Some(secondary)) => write!(f, "{},{}", primary, secondary),
            (Some(primary), None) => write!(f, "{}", primary),
            (None, _) => write!(f, "symbolic"),
        }
    }
}

/// What the instrument reported when the link was created.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct LinkInfo {
    pub lid: LinkId,
    pub abort_port: u16,
    pub max_recv_size: u32,
}

impl From<CreateLinkResp> for LinkInfo {
    fn from(resp: CreateLinkResp) -> Self {
        LinkInfo {
            lid: resp.lid,
            abort_port: resp.abort_port,
            max_recv_size: resp.max_recv_size,
        }
    }
}

pub(crate) fn create_link(
    transport: &mut dyn Transport,
    ctx: &CallContext,
    device: &str,
    client_id: i32,
    grace: Duration,
) -> Result<LinkInfo, Error> {
    let parms = CreateLinkParms {
        client_id,
        lock_device: false,
        lock_timeout: ctx.lock_timeout_ms(),
        device: device.to_string(),
    };
    let resp: CreateLinkResp = invoke(
        transport,
        Procedure::CreateLink,
        &parms,
        ctx.rpc_timeout(grace),
    )?;
    check(resp.error, "create_link")?;
    log::debug!(
        "Created link {} to {} (max_recv_size={}, abort_port={})",
        resp.lid,
        device,
        resp.max_recv_size,
        resp.abort_port
    );
    Ok(resp.into())
}

pub(crate) fn destroy_link(
    transport: &mut dyn Transport,
    lid: LinkId,
    timeout: Duration,
) -> Result<(), Error> {
    let resp: DeviceError = invoke(transport, Procedure::DestroyLink, &lid, timeout)?;
    check(resp.error, "destroy_link")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn link_names() {
        assert_eq!(
            DeviceAddress::symbolic().link_name("inst0").unwrap(),
            "inst0"
        );
        assert_eq!(
            DeviceAddress::primary(20).link_name("hpib").unwrap(),
            "hpib,20"
        );
        assert_eq!(
            DeviceAddress::with_secondary(20, 0)
                .link_name("hpib")
                .unwrap(),
            "hpib,20,0"
        );
    }

    #[test]
    fn raw_addresses() {
        assert_eq!(DeviceAddress::from_raw(-1, -1), DeviceAddress::symbolic());
        assert_eq!(
            DeviceAddress::from_raw(20, 0),
            DeviceAddress::with_secondary(20, 0)
        );
        assert_eq!(DeviceAddress::from_raw(5, -1), DeviceAddress::primary(5));
    }

    #[test]
    fn invalid_addresses() {
        for address in [
            DeviceAddress::primary(31),
            DeviceAddress::with_secondary(3, 31),
            DeviceAddress::from_raw(-1, 4),
        ] {
            let err = address.link_name("gpib0").unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidAddress, "{}", address);
        }
    }
}
