//! Networks and subnets

use super::{folder_attributes, validate_name};
use crate::error::{LocalCloudError, Result};
use crate::inputs::Inputs;
use crate::schema::{NETWORK, SUBNET};
use crate::store::{CloudStore, generate_id};
use infraflow_cloud::{ObjectState, ProviderContext};
use serde_json::Value;
use std::net::Ipv4Addr;

/// Prefix lengths accepted for a subnet
const MIN_PREFIX: u8 = 16;
const MAX_PREFIX: u8 = 28;

pub fn create_network(
    store: &mut CloudStore,
    context: &ProviderContext,
    inputs: &Value,
) -> Result<ObjectState> {
    let args = Inputs::new(inputs);
    let name = args.str("name")?;
    validate_name("name", name)?;

    if store.of_kind(NETWORK).any(|n| n.input_str("name") == Some(name)) {
        return Err(LocalCloudError::Conflict(format!(
            "network with name '{}' already exists",
            name
        )));
    }

    let id = generate_id(NETWORK);
    Ok(store
        .insert(NETWORK, id, inputs, folder_attributes(context))
        .to_object_state())
}

pub fn update_network(store: &mut CloudStore, id: &str, inputs: &Value) -> Result<ObjectState> {
    let name = Inputs::new(inputs).str("name")?;
    validate_name("name", name)?;
    if store
        .of_kind(NETWORK)
        .any(|n| n.id != id && n.input_str("name") == Some(name))
    {
        return Err(LocalCloudError::Conflict(format!(
            "network with name '{}' already exists",
            name
        )));
    }
    Ok(store
        .update(NETWORK, id, inputs, Default::default())?
        .to_object_state())
}

pub fn delete_network(store: &mut CloudStore, id: &str) -> Result<()> {
    store.require(NETWORK, id)?;
    let subnets = store
        .of_kind(SUBNET)
        .filter(|s| s.input_str("network_id") == Some(id))
        .count();
    if subnets > 0 {
        return Err(LocalCloudError::Conflict(format!(
            "network {} still has {} subnet(s)",
            id, subnets
        )));
    }
    store.remove(NETWORK, id)?;
    Ok(())
}

pub fn create_subnet(
    store: &mut CloudStore,
    context: &ProviderContext,
    inputs: &Value,
) -> Result<ObjectState> {
    let args = Inputs::new(inputs);
    let name = args.str("name")?;
    validate_name("name", name)?;

    let network_id = args.str("network_id")?;
    if store.get(NETWORK, network_id).is_none() {
        return Err(LocalCloudError::Rejected(format!(
            "network {} does not exist",
            network_id
        )));
    }

    if args.opt_str("zone")?.or(context.zone.as_deref()).is_none() {
        return Err(LocalCloudError::invalid("zone", "is required"));
    }

    let blocks = args.strings("v4_cidr_blocks")?;
    if blocks.is_empty() {
        return Err(LocalCloudError::invalid("v4_cidr_blocks", "is required"));
    }
    let mut ranges = Vec::new();
    for block in &blocks {
        ranges.push(parse_cidr(block)?);
    }

    for subnet in store
        .of_kind(SUBNET)
        .filter(|s| s.input_str("network_id") == Some(network_id))
    {
        let existing = Inputs::new(&subnet.inputs).strings("v4_cidr_blocks")?;
        for other in existing {
            let other_range = parse_cidr(other)?;
            if let Some(block) = blocks
                .iter()
                .zip(&ranges)
                .find(|(_, r)| overlaps(**r, other_range))
                .map(|(b, _)| b)
            {
                return Err(LocalCloudError::Conflict(format!(
                    "{} overlaps {} of subnet {}",
                    block, other, subnet.id
                )));
            }
        }
    }

    let id = generate_id(SUBNET);
    Ok(store
        .insert(SUBNET, id, inputs, folder_attributes(context))
        .to_object_state())
}

/// Only name and description change in place
pub fn update_subnet(store: &mut CloudStore, id: &str, inputs: &Value) -> Result<ObjectState> {
    validate_name("name", Inputs::new(inputs).str("name")?)?;
    Ok(store
        .update(SUBNET, id, inputs, Default::default())?
        .to_object_state())
}

pub fn delete_subnet(store: &mut CloudStore, id: &str) -> Result<()> {
    store.remove(SUBNET, id)?;
    Ok(())
}

/// Parse `a.b.c.d/n` into the network address and prefix length
pub(crate) fn parse_cidr(block: &str) -> Result<(u32, u8)> {
    let invalid = |message: &str| {
        LocalCloudError::invalid("v4_cidr_blocks", format!("'{}' {}", block, message))
    };

    let (address, prefix) = block
        .split_once('/')
        .ok_or_else(|| invalid("is not in CIDR notation"))?;
    let address: Ipv4Addr = address
        .parse()
        .map_err(|_| invalid("has an invalid address"))?;
    let prefix: u8 = prefix
        .parse()
        .ok()
        .filter(|p| *p <= 32)
        .ok_or_else(|| invalid("has an invalid prefix length"))?;

    if !(MIN_PREFIX..=MAX_PREFIX).contains(&prefix) {
        return Err(invalid(&format!(
            "must have a prefix between /{} and /{}",
            MIN_PREFIX, MAX_PREFIX
        )));
    }

    let bits = u32::from(address);
    if bits & !mask(prefix) != 0 {
        return Err(invalid("has host bits set"));
    }
    Ok((bits, prefix))
}

fn mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

fn overlaps(a: (u32, u8), b: (u32, u8)) -> bool {
    let m = mask(a.1.min(b.1));
    a.0 & m == b.0 & m
}
