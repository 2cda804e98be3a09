mod common;

use common::{Call, Failure, aid, authenticated, cap_file, shared, CardState};
use gpman::{
    Dispatcher, Error, Key, KeyOverrides, KeySet, MemoryReporter, SessionOptions,
    config::{CreateRequest, DeleteRequest, InstallRequest, LockRequest},
    dispatch::Verb,
    globalplatform::StatusWord,
    keys::{DEFAULT_KEY, KeyDescriptor},
};

fn run(
    state: &common::SharedCard,
    keys: &KeySet,
    options: &SessionOptions,
    verb: Verb<'_>,
) -> (gpman::Result<()>, MemoryReporter) {
    let mut card = authenticated(state);
    let mut reporter = MemoryReporter::default();
    let result = Dispatcher::new(keys, options, &mut reporter).run(&mut card, &verb);
    (result, reporter)
}

fn run_default(state: &common::SharedCard, verb: Verb<'_>) -> (gpman::Result<()>, MemoryReporter) {
    run(state, &KeySet::default(), &SessionOptions::default(), verb)
}

fn lock_request(ambiguous: bool) -> LockRequest {
    LockRequest {
        key: Key::from_hex("00112233445566778899AABBCCDDEEFF").unwrap(),
        version: 0x01,
        ambiguous,
    }
}

#[test]
fn test_delete_absent_aid_is_reported_without_deleting() {
    let state = shared(CardState::default());
    let request = DeleteRequest {
        aids: vec![aid("A000000001")],
        ..Default::default()
    };

    let (result, reporter) = run_default(&state, Verb::Delete(&request));

    result.unwrap();
    assert!(reporter.printed("Could not delete AID (not present on card): A000000001"));
    assert!(!state.borrow().called(|c| matches!(c, Call::Delete(..))));
}

#[test]
fn test_delete_rejected_suggests_dependencies() {
    let state = shared(
        CardState::default()
            .with_package("A0000000620301", &["A000000062030101"])
            .failing("delete", Failure::Status(0x6985)),
    );
    let request = DeleteRequest {
        aids: vec![aid("A0000000620301")],
        ..Default::default()
    };

    let (result, reporter) = run_default(&state, Verb::Delete(&request));

    let err = result.unwrap_err();
    assert_eq!(err.status(), Some(StatusWord::from_u16(0x6985)));
    assert!(reporter.printed("Could not delete AID: A0000000620301"));
    assert!(reporter.printed("TIP"));
}

#[test]
fn test_delete_other_rejection_has_no_tip() {
    let state = shared(
        CardState::default()
            .with_package("A0000000620301", &[])
            .failing("delete", Failure::Status(0x6A80)),
    );
    let request = DeleteRequest {
        aids: vec![aid("A0000000620301")],
        with_dependents: true,
        ..Default::default()
    };

    let (result, reporter) = run_default(&state, Verb::Delete(&request));

    assert!(matches!(result, Err(Error::Protocol { .. })));
    assert!(!reporter.printed("TIP"));
    assert!(state
        .borrow()
        .called(|c| c == &Call::Delete(aid("A0000000620301"), true)));
}

#[test]
fn test_delete_default_selected_package() {
    let state = shared(
        CardState::default()
            .with_package("A0000000620301", &["A000000062030101"])
            .with_application("A000000062030101", 0x04),
    );
    let request = DeleteRequest {
        default_selected: true,
        ..Default::default()
    };

    let (result, reporter) = run_default(&state, Verb::Delete(&request));

    result.unwrap();
    assert!(reporter.printed("A0000000620301 deleted."));
    let state = state.borrow();
    assert!(state.called(|c| c == &Call::Delete(aid("A0000000620301"), true)));
    assert_eq!(state.registry.len(), 1);
}

#[test]
fn test_uninstall() {
    let source = cap_file();

    let state = shared(CardState::default());
    let (result, reporter) = run_default(&state, Verb::Uninstall(&source));
    result.unwrap();
    assert!(reporter.printed("A0000000620301 is not present on card!"));
    assert!(!state.borrow().called(|c| matches!(c, Call::Delete(..))));

    let state = shared(CardState::default().with_package("A0000000620301", &["A000000062030101"]));
    let (result, reporter) = run_default(&state, Verb::Uninstall(&source));
    result.unwrap();
    assert!(reporter.printed("A0000000620301 deleted."));
    assert!(state
        .borrow()
        .called(|c| c == &Call::Delete(aid("A0000000620301"), true)));
}

#[test]
fn test_install_warns_when_applet_present_and_proceeds() {
    let state = shared(CardState::default().with_application("A000000062030101", 0x00));
    let request = InstallRequest {
        source: cap_file(),
        applet: None,
        instance: None,
        make_default: false,
        reinstall: false,
        params: None,
    };

    let (result, reporter) = run_default(&state, Verb::Install(&request));

    result.unwrap();
    assert!(reporter.warned("WARNING: Applet A000000062030101 already present on card"));
    let state = state.borrow();
    assert!(state.called(|c| c == &Call::Load(aid("A0000000620301"))));
    assert!(state.called(|c| matches!(
        c,
        Call::Install(installation)
            if installation.applet == aid("A000000062030101")
                && installation.instance == aid("A000000062030101")
                && installation.privileges == 0x00
    )));
}

#[test]
fn test_install_default_with_reinstall() {
    let state = shared(
        CardState::default()
            .with_package("D2760000850101", &["D276000085010101"])
            .with_application("D276000085010101", 0x04),
    );
    let request = InstallRequest {
        source: cap_file(),
        applet: None,
        instance: Some(aid("A000000062030101AA")),
        make_default: true,
        reinstall: true,
        params: Some(vec![0x01, 0x02]),
    };

    let (result, reporter) = run_default(&state, Verb::Install(&request));

    result.unwrap();
    assert!(reporter.warnings.is_empty());
    let state = state.borrow();
    let delete = state
        .calls
        .iter()
        .position(|c| c == &Call::Delete(aid("D2760000850101"), true))
        .unwrap();
    let install = state
        .calls
        .iter()
        .position(|c| matches!(c, Call::Install(i) if i.privileges == 0x04 && i.params.as_deref() == Some(&[0x01, 0x02][..])))
        .unwrap();
    assert!(delete < install);
}

#[test]
fn test_install_incompatible_load_file() {
    let state = shared(CardState::default().failing("load", Failure::Status(0x6985)));
    let request = InstallRequest {
        source: cap_file(),
        applet: None,
        instance: None,
        make_default: false,
        reinstall: false,
        params: None,
    };

    let (result, reporter) = run_default(&state, Verb::Install(&request));

    assert_eq!(result.unwrap_err().status(), Some(StatusWord::from_u16(0x6985)));
    assert!(reporter.warned("compatible with your card"));
    assert!(!state.borrow().called(|c| matches!(c, Call::Install(_))));
}

#[test]
fn test_load_only() {
    let state = shared(CardState::default());
    let source = cap_file();

    let (result, _) = run_default(&state, Verb::Load(&source));

    result.unwrap();
    let state = state.borrow();
    assert!(state.called(|c| c == &Call::Load(aid("A0000000620301"))));
    assert!(!state.called(|c| matches!(c, Call::Install(_))));
}

#[test]
fn test_create_is_not_default_selectable() {
    let state = shared(CardState::default().with_package("A0000000620301", &["A000000062030101"]));
    let request = CreateRequest {
        instance: aid("A000000062030102"),
        package: aid("A0000000620301"),
        applet: aid("A000000062030101"),
        params: None,
    };

    let (result, _) = run_default(&state, Verb::Create(&request));

    result.unwrap();
    assert!(state.borrow().called(|c| matches!(
        c,
        Call::Install(i) if i.instance == aid("A000000062030102") && i.privileges == 0x00
    )));
}

#[test]
fn test_list_preserves_order_and_modules() {
    let state = shared(
        CardState::default()
            .with_application("D276000085010101", 0x04)
            .with_application("A000000151535041", 0x80)
            .with_package("D2760000850101", &["D276000085010101", "D276000085010102"])
            .with_package("A0000000620301", &[]),
    );

    let (result, reporter) = run_default(&state, Verb::List);

    result.unwrap();
    let aids: Vec<&str> = reporter
        .lines
        .iter()
        .filter_map(|line| line.strip_prefix("AID: "))
        .collect();
    assert_eq!(
        aids,
        [
            "A000000151000000",
            "D276000085010101",
            "A000000151535041",
            "D2760000850101",
            "A0000000620301",
        ]
    );

    let package = reporter
        .lines
        .iter()
        .position(|line| line == "AID: D2760000850101")
        .unwrap();
    assert_eq!(reporter.lines[package + 2], "     D276000085010101");
    assert_eq!(reporter.lines[package + 3], "     D276000085010102");
    assert_eq!(reporter.lines[package + 4], "");
    assert!(!state.borrow().called(|c| matches!(c, Call::Delete(..) | Call::Install(_))));
}

#[test]
fn test_lock_replaces_three_keys_and_records_key() {
    let state = shared(CardState::default());
    let request = lock_request(false);

    let (result, reporter) = run_default(&state, Verb::Lock(&request));

    result.unwrap();
    assert!(reporter.printed("Card locked with: 3DES 00112233445566778899AABBCCDDEEFF"));
    assert!(reporter.printed("DO NOT FORGET/LOSE IT"));
    assert!(reporter.warnings.is_empty());

    let state = state.borrow();
    let Some(Call::PutKeys(entries, replace)) = state.calls.last() else {
        panic!("no PUT KEY");
    };
    assert!(*replace);
    let ids: Vec<u8> = entries.iter().map(|e| e.id).collect();
    assert_eq!(ids, [1, 2, 3]);
    assert!(entries.iter().all(|e| e.version == 0x01 && e.key == request.key));
}

#[test]
fn test_lock_adds_keys_on_virgin_or_diversified_cards() {
    let request = lock_request(false);

    let state = shared(CardState::default());
    let virgin = SessionOptions {
        virgin: true,
        ..Default::default()
    };
    let (result, _) = run(&state, &KeySet::default(), &virgin, Verb::Lock(&request));
    result.unwrap();
    assert!(state.borrow().called(|c| matches!(c, Call::PutKeys(_, false))));

    let state = shared(CardState::default());
    let emv = KeySet::resolve(KeyOverrides {
        emv: true,
        ..Default::default()
    })
    .unwrap();
    let (result, _) = run(&state, &emv, &SessionOptions::default(), Verb::Lock(&request));
    result.unwrap();
    assert!(state.borrow().called(|c| matches!(c, Call::PutKeys(_, false))));
}

#[test]
fn test_lock_warns_about_other_keys() {
    let request = lock_request(true);

    let state = shared(CardState::default());
    let (result, reporter) = run_default(&state, Verb::Lock(&request));
    result.unwrap();
    assert!(reporter.warned("STRICT WARNING"));

    let state = shared(CardState::default());
    let relaxed = SessionOptions {
        relaxed: true,
        ..Default::default()
    };
    let (result, reporter) = run(&state, &KeySet::default(), &relaxed, Verb::Lock(&request));
    result.unwrap();
    assert!(reporter.warned("WARNING"));
    assert!(!reporter.warned("STRICT"));
}

#[test]
fn test_lock_then_unlock_restores_default_keys() {
    let state = shared(CardState::default());
    let request = lock_request(false);

    let (result, _) = run_default(&state, Verb::Lock(&request));
    result.unwrap();

    // the card reports its own key ids for the new key set
    let template: Vec<KeyDescriptor> = [0x21, 0x22, 0x23]
        .into_iter()
        .map(|id| KeyDescriptor {
            id,
            version: 0x01,
            key_type: 0x80,
            length: 0x10,
        })
        .collect();
    state.borrow_mut().template = template.clone();

    let (result, reporter) = run_default(&state, Verb::Unlock);
    result.unwrap();
    assert!(reporter.printed("Default 3DES 404142434445464748494A4B4C4D4E4F set as master key."));

    let state = state.borrow();
    let read = state
        .calls
        .iter()
        .position(|c| c == &Call::KeyInfoTemplate)
        .unwrap();
    let Some(Call::PutKeys(entries, replace)) = state.calls.get(read + 1) else {
        panic!("PUT KEY must follow the template read");
    };
    assert!(*replace);
    let ids: Vec<u8> = entries.iter().map(|e| e.id).collect();
    let template_ids: Vec<u8> = template.iter().map(|d| d.id).collect();
    assert_eq!(ids, template_ids);
    assert!(state
        .keys
        .iter()
        .all(|e| e.key.bytes() == DEFAULT_KEY && e.version == 0x01));
}

#[test]
fn test_unlock_rejects_short_template() {
    let state = shared(CardState::default());
    state.borrow_mut().template.truncate(2);

    let (result, _) = run_default(&state, Verb::Unlock);

    assert!(matches!(result, Err(Error::TemplateIntegrity { actual: 2 })));
    assert!(!state.borrow().called(|c| matches!(c, Call::PutKeys(..))));
}

#[test]
fn test_make_default() {
    let state = shared(CardState::default());
    let target = aid("D276000085010101");

    let (result, _) = run_default(&state, Verb::MakeDefault(&target));

    result.unwrap();
    assert_eq!(state.borrow().calls, [Call::MakeDefault(target, 0x04)]);
}

#[test]
fn test_secure_apdu_is_reported() {
    let state = shared(CardState::default());
    let apdu = [0x80, 0xCA, 0x00, 0x66, 0x00];

    let (result, reporter) = run_default(&state, Verb::SecureApdu(&apdu));

    result.unwrap();
    assert_eq!(reporter.lines, [">> 80CA006600", "<< 9000"]);
    assert_eq!(state.borrow().calls, [Call::TransmitSecure(apdu.to_vec())]);
}
