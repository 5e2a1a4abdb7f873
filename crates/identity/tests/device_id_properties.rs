use auroprint_identity::{
    derive_device_id, DisplayMetrics, HardwareDescriptors, SignalKind, StaticDeviceSignals,
};
use proptest::prelude::*;

fn descriptors() -> impl Strategy<Value = HardwareDescriptors> {
    (
        proptest::collection::vec("[a-zA-Z0-9 ._-]{0,16}", 8),
        proptest::option::of("[a-zA-Z0-9 ]{1,12}"),
        proptest::option::of("[a-zA-Z0-9 ]{1,12}"),
    )
        .prop_map(|(fields, soc_manufacturer, soc_model)| HardwareDescriptors {
            board: fields[0].clone(),
            bootloader: fields[1].clone(),
            brand: fields[2].clone(),
            device: fields[3].clone(),
            hardware: fields[4].clone(),
            manufacturer: fields[5].clone(),
            model: fields[6].clone(),
            product: fields[7].clone(),
            soc_manufacturer,
            soc_model,
        })
}

fn signals() -> impl Strategy<Value = StaticDeviceSignals> {
    (
        proptest::option::of(proptest::collection::vec(any::<u8>(), 0..32)),
        descriptors(),
        proptest::option::of((1u32..4096, 1u32..4096, 80u32..800)),
    )
        .prop_map(|(drm_device_id, descriptors, display)| StaticDeviceSignals {
            drm_device_id,
            descriptors,
            display: display.map(|(w, h, dpi)| DisplayMetrics {
                width_pixels: w,
                height_pixels: h,
                density_dpi: dpi,
            }),
        })
}

proptest! {
    #[test]
    fn derivation_is_deterministic(source in signals()) {
        let first = derive_device_id(&source);
        let second = derive_device_id(&source);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.device_id.len(), 64);
        prop_assert!(first
            .device_id
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn omissions_track_missing_signals(source in signals()) {
        let derived = derive_device_id(&source);
        let drm_missing = source.drm_device_id.as_ref().map_or(true, Vec::is_empty);
        prop_assert_eq!(derived.omitted.contains(&SignalKind::DrmId), drm_missing);
        prop_assert_eq!(
            derived.omitted.contains(&SignalKind::Display),
            source.display.is_none()
        );
    }

    #[test]
    fn display_change_changes_identifier(source in signals(), bump in 1u32..100) {
        prop_assume!(source.display.is_some());
        let mut rotated = source.clone();
        if let Some(display) = rotated.display.as_mut() {
            display.density_dpi += bump;
        }
        prop_assert_ne!(
            derive_device_id(&source).device_id,
            derive_device_id(&rotated).device_id
        );
    }
}
