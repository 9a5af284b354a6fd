//! Function 0x2B/0x0E (ReadDeviceIdentification) paging logic (component H).

use crate::errors::ProtocolErrorKind;
use crate::handler::DeviceIdentityProvider;
use crate::pdu::MEI_TYPE_READ_DEVICE_IDENTIFICATION;

const OBJECT_VENDOR_NAME: u8 = 0x00;
const OBJECT_PRODUCT_CODE: u8 = 0x01;
const OBJECT_MAJOR_MINOR_REVISION: u8 = 0x02;

const CODE_BASIC: u8 = 0x01;
const CODE_REGULAR: u8 = 0x02;
const CODE_EXTENDED: u8 = 0x03;
const CODE_SPECIFIC: u8 = 0x04;

const CONFORMITY_STREAM_ACCESS_BIT: u8 = 0x80;

fn objects_for(identity: &dyn DeviceIdentityProvider) -> Vec<(u8, String)> {
    let mut objects = vec![
        (OBJECT_VENDOR_NAME, identity.vendor_name().to_string()),
        (OBJECT_PRODUCT_CODE, identity.product_code().to_string()),
        (
            OBJECT_MAJOR_MINOR_REVISION,
            identity.major_minor_revision().to_string(),
        ),
    ];
    for &(id, value) in identity.extended_objects() {
        objects.push((id, value.to_string()));
    }
    objects.sort_by_key(|(id, _)| *id);
    objects
}

/// Builds the response PDU data (everything after the function code) for a
/// single device-identification request, honouring `max_adu_data_budget`
/// (the ADU's data capacity minus the 6 metadata bytes this response always
/// carries). When the full object set does not fit, sets `more_follows` and
/// truncates so the master can reissue starting at `next_object_id`.
pub fn build_response(
    read_id_code: u8,
    object_id: u8,
    identity: &dyn DeviceIdentityProvider,
    max_adu_data_budget: usize,
) -> Result<Vec<u8>, ProtocolErrorKind> {
    let all_objects = objects_for(identity);

    let ceiling = match read_id_code {
        CODE_BASIC => OBJECT_MAJOR_MINOR_REVISION,
        CODE_REGULAR => 0x7F,
        CODE_EXTENDED => 0xFF,
        CODE_SPECIFIC => object_id,
        _ => return Err(ProtocolErrorKind::IllegalDataValue),
    };

    let mut candidates: Vec<&(u8, String)> = all_objects
        .iter()
        .filter(|(id, _)| *id >= object_id && *id <= ceiling)
        .collect();
    if read_id_code == CODE_SPECIFIC {
        candidates.retain(|(id, _)| *id == object_id);
    }
    if candidates.is_empty() {
        return Err(ProtocolErrorKind::IllegalDataAddress);
    }

    let mut emitted = Vec::new();
    let mut used = 0usize;
    let mut more_follows = false;
    let mut next_object_id = 0u8;

    for (id, value) in &candidates {
        let entry_len = 2 + value.len();
        if used + entry_len > max_adu_data_budget && !emitted.is_empty() {
            more_follows = true;
            next_object_id = *id;
            break;
        }
        emitted.push((*id, value.clone()));
        used += entry_len;
    }

    let mut body = Vec::with_capacity(6 + used);
    body.push(MEI_TYPE_READ_DEVICE_IDENTIFICATION);
    body.push(read_id_code);
    body.push(CONFORMITY_STREAM_ACCESS_BIT | read_id_code);
    body.push(if more_follows { 0xFF } else { 0x00 });
    body.push(next_object_id);
    body.push(emitted.len() as u8);
    for (id, value) in &emitted {
        body.push(*id);
        body.push(value.len() as u8);
        body.extend_from_slice(value.as_bytes());
    }

    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture;
    impl DeviceIdentityProvider for Fixture {
        fn vendor_name(&self) -> &str {
            "Example Co"
        }
        fn product_code(&self) -> &str {
            "MBX-1000"
        }
        fn major_minor_revision(&self) -> &str {
            "1.0"
        }
    }

    #[test]
    fn basic_request_returns_three_objects() {
        let body = build_response(CODE_BASIC, 0, &Fixture, 200).unwrap();
        assert_eq!(body[0], MEI_TYPE_READ_DEVICE_IDENTIFICATION);
        assert_eq!(body[3], 0x00); // more_follows
        assert_eq!(body[5], 3); // number_of_objects
    }

    #[test]
    fn tight_budget_pages_across_requests() {
        let first = build_response(CODE_BASIC, 0, &Fixture, 10).unwrap();
        assert_eq!(first[3], 0xFF);
        let next_id = first[4];
        assert!(next_id > 0);

        let second = build_response(CODE_BASIC, next_id, &Fixture, 200).unwrap();
        assert_eq!(second[3], 0x00);
    }

    #[test]
    fn specific_object_out_of_range_is_illegal_address() {
        let err = build_response(CODE_SPECIFIC, 0x50, &Fixture, 200).unwrap_err();
        assert_eq!(err, ProtocolErrorKind::IllegalDataAddress);
    }
}
