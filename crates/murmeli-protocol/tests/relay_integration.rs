//! Store-and-forward through a mutual trusted friend.

mod common;

use common::{befriend, Net};
use murmeli_protocol::{
    ContactStatus, Disposition, FlushOutcome, Keyring, MessageType, Recipient, Store,
};

#[tokio::test]
async fn offline_recipient_reached_through_friend() {
    let net = Net::new();
    let alice = net.node("alicealicealicea", "Alice", 1);
    let bob = net.node("bobbobbobbobbobb", "Bob", 2);
    let carol = net.node("carolcarolcarolc", "Carol", 3);
    befriend(&alice, &bob, ContactStatus::Trusted);
    befriend(&alice, &carol, ContactStatus::Trusted);
    befriend(&carol, &bob, ContactStatus::Trusted);

    net.set_offline(&bob, true);
    alice.node.send_message(&[bob.id.clone()], "via carol", None).unwrap();
    let outcome = alice.node.engine().flush().await;
    assert_eq!(
        outcome,
        FlushOutcome::Completed {
            failed: vec![bob.id.clone()],
            remaining: 1
        }
    );

    // The row stays; carol has been used up as a relay.
    let row = alice.store.get_outbox().unwrap().remove(0);
    assert!(row.relays.is_empty());
    assert!(row.relay_message.is_some());

    // Carol cannot read the parcel and passes it on to bob, not back to alice.
    assert_eq!(net.pump(&carol), vec![Some(Disposition::Handled)]);
    let fan_out = carol.store.get_outbox().unwrap();
    assert_eq!(fan_out.len(), 1);
    assert_eq!(fan_out[0].recipient, Recipient::List(vec![bob.id.clone()]));
    assert!(carol.store.get_inbox().unwrap().is_empty());

    net.set_offline(&bob, false);
    carol.node.engine().flush().await;
    assert!(carol.store.get_outbox().unwrap().is_empty());
    net.pump(&bob);

    let inbox = bob.store.get_inbox().unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].message_type, MessageType::Regular);
    assert_eq!(inbox[0].from_id, alice.id);
    assert_eq!(inbox[0].message_body, "via carol");

    // The direct copy arrives later and is recognised.
    alice.node.engine().flush().await;
    assert_eq!(net.pump(&bob), vec![Some(Disposition::Duplicate)]);
    assert_eq!(bob.store.get_inbox().unwrap().len(), 1);
    assert!(alice.store.get_outbox().unwrap().is_empty());

    let metrics = alice.node.engine().metrics();
    assert_eq!(metrics.relay_sends, 1);
    assert_eq!(metrics.direct_sends, 1);
    assert_eq!(carol.node.engine().metrics().relayed_for_others, 1);
}

#[tokio::test]
async fn untrusted_relayer_ignored() {
    let net = Net::new();
    let alice = net.node("alicealicealicea", "Alice", 1);
    let bob = net.node("bobbobbobbobbobb", "Bob", 2);
    let carol = net.node("carolcarolcarolc", "Carol", 3);
    befriend(&alice, &bob, ContactStatus::Trusted);
    befriend(&carol, &bob, ContactStatus::Trusted);
    // Alice trusts carol, carol has never heard of alice.
    alice
        .store
        .add_or_update_profile({
            let mut p = murmeli_protocol::ContactProfile::new(carol.id.clone(), ContactStatus::Trusted, "Carol");
            p.key_id = alice.keyring.import_public_key(&carol.keyring.export_public_key());
            p
        })
        .unwrap();

    net.set_offline(&bob, true);
    alice.node.send_message(&[bob.id.clone()], "psst", None).unwrap();
    alice.node.engine().flush().await;

    assert!(matches!(net.pump(&carol)[..], [Some(Disposition::Dropped(_))]));
    assert!(carol.store.get_outbox().unwrap().is_empty());
}

#[tokio::test]
async fn group_message_reaches_every_recipient() {
    let net = Net::new();
    let alice = net.node("alicealicealicea", "Alice", 1);
    let bob = net.node("bobbobbobbobbobb", "Bob", 2);
    let carol = net.node("carolcarolcarolc", "Carol", 3);
    befriend(&alice, &bob, ContactStatus::Trusted);
    befriend(&alice, &carol, ContactStatus::Untrusted);

    alice
        .node
        .send_message(&[bob.id.clone(), carol.id.clone()], "hi both", None)
        .unwrap();
    alice.node.engine().flush().await;
    net.pump(&bob);
    net.pump(&carol);

    for node in [&bob, &carol] {
        let inbox = node.store.get_inbox().unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].recipients, vec![bob.id.clone(), carol.id.clone()]);
    }
}
