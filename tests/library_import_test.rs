//! End-to-end: capacity failures, library-only fallback, and duplicate
//! warnings on import.

use patchdump::{
    Codec, DumpConfig, DumpError, DumpEvent, ImportPolicy, ImportRequest, MemoryStore,
    PatchPayload, PatchStore, Placement, ReconcileError, SessionCoordinator, SlotAddress,
    PATCH_PAYLOAD_LEN,
};
use std::sync::Arc;

fn payload(tag: u16) -> PatchPayload {
    let mut bytes = vec![0u8; PATCH_PAYLOAD_LEN];
    bytes[0] = (tag & 0x7F) as u8;
    bytes[1] = (tag >> 7) as u8;
    PatchPayload::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_oversized_batch_fails_then_imports_library_only() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let (mut coordinator, _wire_rx, mut event_rx) =
        SessionCoordinator::new(store.clone(), DumpConfig::default());
    let device = Codec::new(0x00);

    // An ambient capture soaks up more patches than a collection holds:
    // the full memory plus one edit-buffer dump.
    coordinator
        .start_capture(ImportRequest {
            collection: Some("too small".to_string()),
            policy: ImportPolicy {
                auto_index: true,
                new_collection: true,
                ..Default::default()
            },
        })
        .await?;

    for (i, addr) in SlotAddress::full_range().into_iter().enumerate() {
        coordinator
            .handle_frame(&device.encode_data(addr, &payload(i as u16)))
            .await?;
    }
    coordinator
        .handle_frame(&device.encode_data(SlotAddress::edit_buffer(), &payload(5000)))
        .await?;

    let err = coordinator.finish_capture().await.unwrap_err();
    match err {
        DumpError::Reconcile(ReconcileError::Capacity { batch, capacity }) => {
            assert_eq!(batch, 1025);
            assert_eq!(capacity, 1024);
        }
        other => panic!("expected capacity error, got {other}"),
    }
    assert!(!coordinator.is_active());
    assert_eq!(store.content_len().await, 0);
    while event_rx.try_recv().is_ok() {}

    // The same batch goes through as a library-only import: UID-bearing
    // records, no slot assignment.
    coordinator
        .reimport(ImportRequest {
            collection: None,
            policy: ImportPolicy::default(),
        })
        .await?;

    let mut plan = None;
    let mut receipt = None;
    while let Ok(event) = event_rx.try_recv() {
        match event {
            DumpEvent::PlanReady(p) => plan = Some(p),
            DumpEvent::Committed(r) => receipt = Some(r),
            _ => {}
        }
    }
    let plan = plan.expect("library-only plan");
    assert!(plan
        .entries
        .iter()
        .all(|e| e.placement == Placement::LibraryOnly));
    assert!(plan.assigned_slots().is_empty());

    let receipt = receipt.expect("library-only commit");
    assert_eq!(receipt.uids.len(), 1025);
    assert_eq!(receipt.collection, None);
    assert_eq!(store.content_len().await, 1025);
    Ok(())
}

#[tokio::test]
async fn test_import_warns_about_stored_duplicates() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());

    // The library already holds this content under a different name.
    store
        .seed("old library", 7, payload(77).with_name("Old Growl"))
        .await;

    let (mut coordinator, _wire_rx, mut event_rx) =
        SessionCoordinator::new(store.clone(), DumpConfig::default());
    let device = Codec::new(0x00);

    coordinator
        .start_capture(ImportRequest {
            collection: Some("incoming".to_string()),
            policy: ImportPolicy {
                auto_index: true,
                new_collection: true,
                ..Default::default()
            },
        })
        .await?;

    // Same parameters, different name: a duplicate. Different parameters:
    // not one.
    coordinator
        .handle_frame(&device.encode_data(
            SlotAddress::new(0, 0).unwrap(),
            &payload(77).with_name("New Growl"),
        ))
        .await?;
    coordinator
        .handle_frame(&device.encode_data(SlotAddress::new(0, 1).unwrap(), &payload(78)))
        .await?;
    coordinator.finish_capture().await?;

    let mut plan = None;
    while let Ok(event) = event_rx.try_recv() {
        if let DumpEvent::PlanReady(p) = event {
            plan = Some(p);
        }
    }
    let plan = plan.expect("plan produced");
    assert_eq!(plan.entries.len(), 2);

    let hits = &plan.entries[0].duplicates;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].name, "Old Growl");
    assert_eq!(hits[0].collections, vec!["old library".to_string()]);
    assert!(plan.entries[1].duplicates.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_reuse_policy_dedups_content_on_import() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let uid = store
        .seed("old library", 3, payload(9).with_name("Original"))
        .await;

    let config = DumpConfig {
        dedup: patchdump::DedupPolicy::ReuseExistingUid,
        ..Default::default()
    };
    let (mut coordinator, _wire_rx, mut event_rx) = SessionCoordinator::new(store.clone(), config);
    let device = Codec::new(0x00);

    coordinator
        .start_capture(ImportRequest {
            collection: Some("reissue".to_string()),
            policy: ImportPolicy {
                auto_index: true,
                new_collection: true,
                ..Default::default()
            },
        })
        .await?;
    coordinator
        .handle_frame(&device.encode_data(
            SlotAddress::new(0, 0).unwrap(),
            &payload(9).with_name("Renamed"),
        ))
        .await?;
    coordinator.finish_capture().await?;

    let mut receipt = None;
    while let Ok(event) = event_rx.try_recv() {
        if let DumpEvent::Committed(r) = event {
            receipt = Some(r);
        }
    }
    let receipt = receipt.expect("committed");
    assert_eq!(receipt.uids, vec![uid]);
    assert_eq!(receipt.reused, 1);

    // One shared UID, referenced by both collections.
    assert_eq!(store.content_len().await, 1);
    assert!(store.occupancy("old library").await?.references(uid));
    assert!(store.occupancy("reissue").await?.references(uid));
    Ok(())
}

#[tokio::test]
async fn test_source_preserving_import_conflicts_instead_of_remapping() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    store.seed("live set", 5, payload(1)).await;

    let (mut coordinator, _wire_rx, mut event_rx) =
        SessionCoordinator::new(store.clone(), DumpConfig::default());
    let device = Codec::new(0x00);

    coordinator
        .start_capture(ImportRequest {
            collection: Some("live set".to_string()),
            policy: ImportPolicy::default(),
        })
        .await?;
    // Source slot 5 is taken in the target; slot 6 is free.
    coordinator
        .handle_frame(&device.encode_data(SlotAddress::slot(5).unwrap(), &payload(2)))
        .await?;
    coordinator
        .handle_frame(&device.encode_data(SlotAddress::slot(6).unwrap(), &payload(3)))
        .await?;
    coordinator.finish_capture().await?;

    let mut plan = None;
    while let Ok(event) = event_rx.try_recv() {
        if let DumpEvent::PlanReady(p) = event {
            plan = Some(p);
        }
    }
    let plan = plan.expect("plan produced");
    assert!(matches!(
        plan.entries[0].placement,
        Placement::Conflict { .. }
    ));
    assert_eq!(
        plan.entries[1].placement,
        Placement::Assigned {
            slot: 6,
            overwrite_pending: false
        }
    );

    // The conflicting record was skipped; the clean one landed.
    let occupancy = store.occupancy("live set").await?;
    assert!(occupancy.is_occupied(6));
    assert_eq!(store.content_len().await, 2);
    Ok(())
}
