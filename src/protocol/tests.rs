use super::*;
use crate::{
    abiencode::{to_bytes, types::U256},
    apps::{
        tests::{registry, UNIDIRECTIONAL},
        CoinTransfer, UnidirectionalTransferAction, UnidirectionalTransferState,
    },
    channel::Participant,
    store::MemoryStore,
    wire::{InProcessBus, ProtoBufEncodingLayer},
};
use rand::{rngs::StdRng, SeedableRng};
use std::collections::BTreeMap;
use tokio::time::{sleep, Duration, Instant};

type Runner = ProtocolRunner<MemoryStore, ProtoBufEncodingLayer<InProcessBus>>;

const ASSET: Address = Address([0xaa; 20]);
const SALT: Hash = Hash([7; 32]);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Party {
    runner: Arc<Runner>,
    store: Arc<MemoryStore>,
}

impl Party {
    fn new(bus: &InProcessBus, identifier: &str, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let store = Arc::new(MemoryStore::new());
        let runner = Arc::new(
            Runner::new(
                identifier,
                Signer::new(&mut rng),
                store.clone(),
                ProtoBufEncodingLayer::new(bus.clone()),
                Arc::new(registry()),
                RunnerConfig::default(),
            )
            .unwrap(),
        );
        runner.spawn_listener(bus.connect(identifier));
        Self { runner, store }
    }

    async fn channel(&self, id: Hash) -> StateChannel {
        self.store.get_channel(id).await.unwrap().unwrap()
    }
}

struct Net {
    bus: InProcessBus,
    alice: Party,
    bob: Party,
}

impl Net {
    fn new() -> Self {
        init_tracing();
        let bus = InProcessBus::new();
        let alice = Party::new(&bus, "alice", 1);
        let bob = Party::new(&bus, "bob", 2);
        Self { bus, alice, bob }
    }

    fn deposits() -> BTreeMap<Address, [U256; 2]> {
        let mut deposits = BTreeMap::new();
        deposits.insert(ASSET, amounts(10, 10));
        deposits
    }

    fn setup_params(&self) -> SetupParams {
        SetupParams {
            salt: SALT,
            initiator_signer: self.alice.runner.address(),
            responder_signer: self.bob.runner.address(),
            deposits: Self::deposits(),
        }
    }

    async fn setup(&self) -> Hash {
        self.alice
            .runner
            .setup("bob", self.setup_params())
            .await
            .unwrap()
            .channel
            .id
    }

    fn unidirectional_state(&self, to_alice: u64, to_bob: u64) -> Vec<u8> {
        to_bytes(&UnidirectionalTransferState {
            coin_transfers: [
                CoinTransfer {
                    to: self.alice.runner.address(),
                    amount: to_alice.into(),
                },
                CoinTransfer {
                    to: self.bob.runner.address(),
                    amount: to_bob.into(),
                },
            ],
            finalized: false,
        })
        .unwrap()
    }

    fn propose_params(&self, initial_state: Vec<u8>) -> ProposeParams {
        ProposeParams {
            app_definition: UNIDIRECTIONAL,
            initial_state,
            asset: ASSET,
            initiator_deposit: 2.into(),
            responder_deposit: 2.into(),
            default_timeout: 100,
            state_timeout: 10,
            app_seq_no: None,
        }
    }

    async fn install_app(&self, channel_id: Hash) -> Hash {
        let proposal = self
            .alice
            .runner
            .propose(channel_id, self.propose_params(self.unidirectional_state(2, 0)))
            .await
            .unwrap();
        let hash = proposal.app_identity_hash.unwrap();
        self.alice.runner.install(hash).await.unwrap();
        hash
    }

    /// Both copies of the channel, asserting they agree.
    async fn agreed_channel(&self, id: Hash) -> StateChannel {
        let alice = self.alice.channel(id).await;
        assert_eq!(alice, self.bob.channel(id).await);
        alice
    }
}

fn balances(channel: &StateChannel) -> [U256; 2] {
    [
        channel.free_balance.balance(ASSET, 0),
        channel.free_balance.balance(ASSET, 1),
    ]
}

fn amounts(first: u64, second: u64) -> [U256; 2] {
    [first.into(), second.into()]
}

async fn app_version(party: &Party, channel_id: Hash, app: Hash) -> u64 {
    party
        .channel(channel_id)
        .await
        .app(&app)
        .unwrap()
        .latest_version_number
}

fn send(amount: u64) -> Vec<u8> {
    to_bytes(&UnidirectionalTransferAction::send(amount.into())).unwrap()
}

#[tokio::test(start_paused = true)]
async fn setup_creates_the_same_channel_on_both_sides() {
    let net = Net::new();
    let id = net.setup().await;

    let channel = net.agreed_channel(id).await;
    assert_eq!(id, channel_id("alice", "bob", SALT).unwrap());
    assert_eq!(balances(&channel), amounts(10, 10));
    assert_eq!(channel.participants[0].identifier, "alice");
    assert_eq!(channel.participants[1].signer, net.bob.runner.address());
    assert!(channel.app_instances.is_empty());
}

#[tokio::test(start_paused = true)]
async fn setup_twice_is_rejected_locally() {
    let net = Net::new();
    let id = net.setup().await;
    let err = net
        .alice
        .runner
        .setup("bob", net.setup_params())
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidParameters(_)));
    net.agreed_channel(id).await;
}

#[tokio::test(start_paused = true)]
async fn setup_with_wrong_responder_signer_is_rejected() {
    let net = Net::new();
    let params = SetupParams {
        responder_signer: Address([9; 20]),
        ..net.setup_params()
    };
    let err = net.alice.runner.setup("bob", params).await.unwrap_err();
    assert!(matches!(err, ProtocolError::Rejected { .. }), "{:?}", err);

    let id = channel_id("alice", "bob", SALT).unwrap();
    assert_eq!(net.alice.store.get_channel(id).await.unwrap(), None);
    assert_eq!(net.bob.store.get_channel(id).await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn setup_with_one_key_for_both_is_refused() {
    let net = Net::new();
    let params = SetupParams {
        responder_signer: net.alice.runner.address(),
        ..net.setup_params()
    };
    let err = net.alice.runner.setup("bob", params).await.unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidParameters(_)), "{:?}", err);

    let id = channel_id("alice", "bob", SALT).unwrap();
    assert_eq!(net.bob.store.get_channel(id).await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn install_locks_deposits() {
    let net = Net::new();
    let id = net.setup().await;
    let hash = net.install_app(id).await;

    let channel = net.agreed_channel(id).await;
    assert_eq!(balances(&channel), amounts(8, 8));
    assert!(channel.proposed_app_instances.is_empty());
    let app = channel.app(&hash).unwrap();
    assert_eq!(app.latest_version_number, 0);
    assert_eq!(app.participants[0].identifier, "alice");
    assert!(app.latest_signatures.is_some());
}

#[tokio::test(start_paused = true)]
async fn take_action_advances_the_app() {
    let net = Net::new();
    let id = net.setup().await;
    let hash = net.install_app(id).await;

    let outcome = net.alice.runner.take_action(hash, send(1), 0).await.unwrap();
    assert_eq!(outcome.app_identity_hash, Some(hash));

    let channel = net.agreed_channel(id).await;
    assert_eq!(outcome.channel, channel);
    let app = channel.app(&hash).unwrap();
    assert_eq!(app.latest_version_number, 1);
    assert_eq!(app.latest_state, net.unidirectional_state(1, 1));
    assert_eq!(app.latest_action, Some(send(1)));
    // The free balance is only touched by install and uninstall.
    assert_eq!(balances(&channel), amounts(8, 8));
}

#[tokio::test(start_paused = true)]
async fn stale_version_changes_nothing() {
    let net = Net::new();
    let id = net.setup().await;
    let hash = net.install_app(id).await;
    net.alice.runner.take_action(hash, send(1), 0).await.unwrap();
    let before = net.agreed_channel(id).await;

    let err = net
        .alice
        .runner
        .take_action(hash, send(1), 0)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ProtocolError::StaleVersion {
            expected: 0,
            current: 1
        }
    );
    assert_eq!(net.agreed_channel(id).await, before);
}

#[tokio::test(start_paused = true)]
async fn uninstall_credits_the_outcome() {
    let net = Net::new();
    let id = net.setup().await;
    let hash = net.install_app(id).await;
    net.alice.runner.take_action(hash, send(1), 0).await.unwrap();

    let outcome = net.alice.runner.uninstall(hash).await.unwrap();
    assert_eq!(balances(&outcome.channel), amounts(9, 9));

    let channel = net.agreed_channel(id).await;
    assert!(channel.app(&hash).is_none());
    assert!(channel.active_apps().is_empty());
    assert_eq!(balances(&channel), amounts(9, 9));
    assert_eq!(
        net.alice.runner.take_action(hash, send(1), 1).await,
        Err(ProtocolError::AppNotFound(hash))
    );
}

#[tokio::test(start_paused = true)]
async fn either_party_can_initiate_and_versions_only_grow() {
    let net = Net::new();
    let id = net.setup().await;
    let hash = net.install_app(id).await;

    let mut version = 0;
    for (i, runner) in [&net.alice.runner, &net.bob.runner, &net.alice.runner]
        .into_iter()
        .enumerate()
    {
        let outcome = runner.take_action(hash, send(0), version).await.unwrap();
        let next = outcome.channel.app(&hash).unwrap().latest_version_number;
        assert_eq!(next, version + 1, "run {}", i);
        version = next;
    }
    assert_eq!(
        net.agreed_channel(id).await.app(&hash).unwrap().latest_version_number,
        3
    );
}

#[tokio::test(start_paused = true)]
async fn duplicate_delivery_is_applied_once() {
    let net = Net::new();
    net.bus.set_duplicate_delivery(true);

    let id = net.setup().await;
    let hash = net.install_app(id).await;
    net.alice.runner.take_action(hash, send(1), 0).await.unwrap();
    // Let the second copies of every message drain.
    sleep(Duration::from_millis(100)).await;

    let channel = net.agreed_channel(id).await;
    assert_eq!(balances(&channel), amounts(8, 8));
    assert_eq!(channel.num_proposed_apps, 1);
    assert_eq!(channel.app(&hash).unwrap().latest_version_number, 1);
}

#[tokio::test(start_paused = true)]
async fn signature_from_unexpected_key_is_rejected() {
    let net = Net::new();
    let id = channel_id("alice", "bob", SALT).unwrap();
    let participants = [
        Participant {
            identifier: "alice".into(),
            signer: net.alice.runner.address(),
        },
        Participant {
            identifier: "bob".into(),
            signer: net.bob.runner.address(),
        },
    ];
    // Alice believes Bob signs with another key.
    let mut believed = participants.clone();
    believed[1].signer = Address([9; 20]);
    net.alice
        .store
        .create_channel(StateChannel::new(id, believed, Net::deposits()).unwrap())
        .await
        .unwrap();
    net.bob
        .store
        .create_channel(StateChannel::new(id, participants, Net::deposits()).unwrap())
        .await
        .unwrap();
    let before = net.alice.channel(id).await;

    let withdraw = WithdrawParams {
        asset: ASSET,
        amount: 1.into(),
        recipient: Address([0x77; 20]),
    };
    let err = net.alice.runner.withdraw(id, withdraw).await.unwrap_err();
    assert!(matches!(err, ProtocolError::SignatureInvalid(_)), "{:?}", err);
    assert_eq!(net.alice.channel(id).await, before);

    // The other way round Bob refuses to countersign.
    let err = net.bob.runner.withdraw(id, withdraw).await.unwrap_err();
    assert!(matches!(err, ProtocolError::Rejected { .. }), "{:?}", err);
}

#[tokio::test(start_paused = true)]
async fn silent_counterparty_times_out_and_releases_the_lock() {
    let net = Net::new();
    let id = net.setup().await;
    let hash = net.install_app(id).await;
    let before = net.alice.channel(id).await;

    net.bus.drop_messages_to("bob", true);
    let start = Instant::now();
    let err = net
        .alice
        .runner
        .take_action(hash, send(1), 0)
        .await
        .unwrap_err();
    assert_eq!(err, ProtocolError::CounterpartyTimeout("bob".into()));
    assert!(start.elapsed() >= RunnerConfig::default().protocol_timeout);
    assert_eq!(net.alice.channel(id).await, before);

    net.bus.drop_messages_to("bob", false);
    let start = Instant::now();
    net.alice.runner.take_action(hash, send(1), 0).await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(
        net.agreed_channel(id).await.app(&hash).unwrap().latest_version_number,
        1
    );
}

#[tokio::test(start_paused = true)]
async fn local_store_failure_changes_nothing() {
    let net = Net::new();
    let id = net.setup().await;
    let hash = net.install_app(id).await;
    let before = net.alice.channel(id).await;

    net.alice.store.set_fail_writes(true);
    let err = net
        .alice
        .runner
        .take_action(hash, send(1), 0)
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::StoreWriteFailure(_)), "{:?}", err);
    assert_eq!(net.alice.channel(id).await, before);
}

#[tokio::test(start_paused = true)]
async fn remote_store_failure_is_a_rejection() {
    let net = Net::new();
    let id = net.setup().await;
    let hash = net.install_app(id).await;
    let before = net.agreed_channel(id).await;

    net.bob.store.set_fail_writes(true);
    let err = net
        .alice
        .runner
        .take_action(hash, send(1), 0)
        .await
        .unwrap_err();
    match err {
        ProtocolError::Rejected { reason } => assert!(reason.contains("store"), "{}", reason),
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(net.agreed_channel(id).await, before);
}

#[tokio::test(start_paused = true)]
async fn invalid_proposals_never_leave_the_initiator() {
    let net = Net::new();
    let id = net.setup().await;
    let before = net.agreed_channel(id).await;

    let unregistered = ProposeParams {
        app_definition: Address([0x99; 20]),
        ..net.propose_params(net.unidirectional_state(2, 0))
    };
    let garbage = net.propose_params(vec![1, 2, 3]);
    let overdrawn = net.propose_params(net.unidirectional_state(5, 0));

    for params in [unregistered, garbage, overdrawn] {
        let err = net.alice.runner.propose(id, params).await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidParameters(_)), "{:?}", err);
    }
    assert_eq!(net.agreed_channel(id).await, before);
}

#[tokio::test(start_paused = true)]
async fn install_needs_enough_free_balance() {
    let net = Net::new();
    let id = net.setup().await;
    let params = ProposeParams {
        initiator_deposit: 11.into(),
        ..net.propose_params(net.unidirectional_state(2, 0))
    };
    let hash = net
        .alice
        .runner
        .propose(id, params)
        .await
        .unwrap()
        .app_identity_hash
        .unwrap();

    let err = net.alice.runner.install(hash).await.unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidParameters(_)), "{:?}", err);
    let channel = net.agreed_channel(id).await;
    assert!(channel.proposal(&hash).is_some());
    assert_eq!(balances(&channel), amounts(10, 10));
}

#[tokio::test(start_paused = true)]
async fn reject_proposal_is_local() {
    let net = Net::new();
    let id = net.setup().await;
    let hash = net
        .alice
        .runner
        .propose(id, net.propose_params(net.unidirectional_state(2, 0)))
        .await
        .unwrap()
        .app_identity_hash
        .unwrap();

    let outcome = net.alice.runner.reject_proposal(id, hash).await.unwrap();
    assert!(outcome.channel.proposal(&hash).is_none());
    assert_eq!(outcome.channel.num_proposed_apps, 1);
    assert!(net.bob.channel(id).await.proposal(&hash).is_some());

    assert_eq!(
        net.alice.runner.install(hash).await,
        Err(ProtocolError::AppNotFound(hash))
    );
    assert_eq!(
        net.alice.runner.reject_proposal(id, hash).await,
        Err(ProtocolError::AppNotFound(hash))
    );
}

#[tokio::test(start_paused = true)]
async fn withdraw_debits_the_initiator() {
    let net = Net::new();
    let id = net.setup().await;
    let recipient = Address([0x77; 20]);

    let outcome = net
        .alice
        .runner
        .withdraw(
            id,
            WithdrawParams {
                asset: ASSET,
                amount: 3.into(),
                recipient,
            },
        )
        .await
        .unwrap();
    assert_eq!(balances(&outcome.channel), amounts(7, 10));

    let channel = net.agreed_channel(id).await;
    assert_eq!(channel.withdrawals.len(), 1);
    let record = channel.withdrawals[0];
    assert_eq!(record.withdrawal.participant, 0);
    assert_eq!(record.withdrawal.recipient, recipient);
    assert_eq!(record.withdrawal.nonce, 0);
    assert!(record.signatures.is_some());

    for amount in [0u64, 8] {
        let err = net
            .alice
            .runner
            .withdraw(
                id,
                WithdrawParams {
                    asset: ASSET,
                    amount: amount.into(),
                    recipient,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidParameters(_)), "{:?}", err);
    }

    // Bob's side of the balance is untouched, so he can still take 10.
    let outcome = net
        .bob
        .runner
        .withdraw(
            id,
            WithdrawParams {
                asset: ASSET,
                amount: 10.into(),
                recipient,
            },
        )
        .await
        .unwrap();
    assert_eq!(balances(&outcome.channel), amounts(7, 0));
    assert_eq!(net.agreed_channel(id).await.withdrawals[1].withdrawal.nonce, 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_runs_on_one_channel_are_serialized() {
    let net = Net::new();
    let id = net.setup().await;
    let hash = net.install_app(id).await;

    let (action, withdrawal) = tokio::join!(
        net.alice.runner.take_action(hash, send(1), 0),
        net.alice.runner.withdraw(
            id,
            WithdrawParams {
                asset: ASSET,
                amount: 1.into(),
                recipient: Address([0x77; 20]),
            },
        ),
    );
    action.unwrap();
    withdrawal.unwrap();

    let channel = net.agreed_channel(id).await;
    assert_eq!(balances(&channel), amounts(7, 8));
    assert_eq!(channel.app(&hash).unwrap().latest_version_number, 1);
    assert_eq!(channel.withdrawals.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn stray_messages_are_ignored() {
    let net = Net::new();
    let id = net.setup().await;

    let stray = ProtocolMessage {
        protocol: crate::messages::ProtocolName::Install,
        process_id: Hash([3; 32]),
        seq: SEQ_REPLY,
        from: "bob".into(),
        to: "alice".into(),
        channel_id: id,
        payload: Payload::Countersign(Signature::default()),
    };
    net.alice.runner.handle_message(stray.clone()).await;
    net.alice
        .runner
        .handle_message(ProtocolMessage {
            to: "carol".into(),
            seq: SEQ_PARAMS,
            ..stray
        })
        .await;

    net.install_app(id).await;
    assert_eq!(balances(&net.agreed_channel(id).await), amounts(8, 8));
}

#[tokio::test(start_paused = true)]
async fn lost_setup_reply_is_recovered_by_retrying() {
    let net = Net::new();
    let id = channel_id("alice", "bob", SALT).unwrap();

    net.bus.drop_messages_to("alice", true);
    let err = net
        .alice
        .runner
        .setup("bob", net.setup_params())
        .await
        .unwrap_err();
    assert_eq!(err, ProtocolError::CounterpartyTimeout("bob".into()));
    net.bus.drop_messages_to("alice", false);
    assert_eq!(net.alice.store.get_channel(id).await.unwrap(), None);

    net.setup().await;
    assert_eq!(balances(&net.agreed_channel(id).await), amounts(10, 10));
}

#[tokio::test(start_paused = true)]
async fn lost_proposal_ack_is_recovered_by_proposing_again() {
    let net = Net::new();
    let id = net.setup().await;
    let params = net.propose_params(net.unidirectional_state(2, 0));

    net.bus.drop_messages_to("alice", true);
    let err = net.alice.runner.propose(id, params.clone()).await.unwrap_err();
    assert_eq!(err, ProtocolError::CounterpartyTimeout("bob".into()));
    net.bus.drop_messages_to("alice", false);
    assert_eq!(net.alice.channel(id).await.num_proposed_apps, 0);
    assert_eq!(net.bob.channel(id).await.num_proposed_apps, 1);

    // Another app would get a sequence number Bob already gave away.
    let other = net.propose_params(net.unidirectional_state(1, 1));
    match net.alice.runner.propose(id, other).await.unwrap_err() {
        ProtocolError::Rejected { reason } => assert!(reason.contains("sequence"), "{}", reason),
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(net.bob.channel(id).await.proposed_app_instances.len(), 1);

    let hash = net
        .alice
        .runner
        .propose(id, params)
        .await
        .unwrap()
        .app_identity_hash
        .unwrap();
    let channel = net.agreed_channel(id).await;
    assert!(channel.proposal(&hash).is_some());
    assert_eq!(channel.num_proposed_apps, 1);

    net.alice.runner.install(hash).await.unwrap();
    assert_eq!(balances(&net.agreed_channel(id).await), amounts(8, 8));
}

#[tokio::test(start_paused = true)]
async fn lost_install_reply_is_recovered_by_retrying() {
    let net = Net::new();
    let id = net.setup().await;
    let hash = net
        .alice
        .runner
        .propose(id, net.propose_params(net.unidirectional_state(2, 0)))
        .await
        .unwrap()
        .app_identity_hash
        .unwrap();

    net.bus.drop_messages_to("alice", true);
    let err = net.alice.runner.install(hash).await.unwrap_err();
    assert_eq!(err, ProtocolError::CounterpartyTimeout("bob".into()));
    net.bus.drop_messages_to("alice", false);
    assert!(net.alice.channel(id).await.proposal(&hash).is_some());
    assert!(net.bob.channel(id).await.app(&hash).is_some());

    net.alice.runner.install(hash).await.unwrap();
    let channel = net.agreed_channel(id).await;
    assert_eq!(balances(&channel), amounts(8, 8));
    assert!(channel.app(&hash).unwrap().latest_signatures.is_some());
}

#[tokio::test(start_paused = true)]
async fn lost_countersignature_is_recovered_by_retrying() {
    let net = Net::new();
    let id = net.setup().await;
    let hash = net.install_app(id).await;

    net.bus.drop_messages_to("alice", true);
    let err = net
        .alice
        .runner
        .take_action(hash, send(1), 0)
        .await
        .unwrap_err();
    assert_eq!(err, ProtocolError::CounterpartyTimeout("bob".into()));
    net.bus.drop_messages_to("alice", false);
    assert_eq!(app_version(&net.alice, id, hash).await, 0);
    assert_eq!(app_version(&net.bob, id, hash).await, 1);

    // Bob committed this very run and signs it again.
    net.alice.runner.take_action(hash, send(1), 0).await.unwrap();
    let channel = net.agreed_channel(id).await;
    assert_eq!(channel.app(&hash).unwrap().latest_version_number, 1);
    assert_eq!(channel.app(&hash).unwrap().latest_state, net.unidirectional_state(1, 1));
}

#[tokio::test(start_paused = true)]
async fn lagging_initiator_adopts_the_latest_signed_state() {
    let net = Net::new();
    let id = net.setup().await;
    let hash = net.install_app(id).await;

    net.bus.drop_messages_to("alice", true);
    assert!(net.alice.runner.take_action(hash, send(1), 0).await.is_err());
    net.bus.drop_messages_to("alice", false);

    // A different action on the old version: Alice catches up instead.
    assert_eq!(
        net.alice.runner.take_action(hash, send(0), 0).await,
        Err(ProtocolError::StaleVersion {
            expected: 0,
            current: 1
        })
    );
    let channel = net.agreed_channel(id).await;
    let app = channel.app(&hash).unwrap();
    assert_eq!(app.latest_version_number, 1);
    assert_eq!(app.latest_state, net.unidirectional_state(1, 1));

    net.alice.runner.take_action(hash, send(1), 1).await.unwrap();
    assert_eq!(
        net.agreed_channel(id).await.app(&hash).unwrap().latest_state,
        net.unidirectional_state(0, 2)
    );
}

#[tokio::test(start_paused = true)]
async fn lagging_responder_is_reported_until_it_catches_up() {
    let net = Net::new();
    let id = net.setup().await;
    let hash = net.install_app(id).await;

    net.bus.drop_messages_to("alice", true);
    assert!(net.alice.runner.take_action(hash, send(1), 0).await.is_err());
    net.bus.drop_messages_to("alice", false);

    assert_eq!(
        net.bob.runner.take_action(hash, send(0), 1).await,
        Err(ProtocolError::OutOfSync {
            app: hash,
            local: 1,
            remote: 0
        })
    );
    assert_eq!(app_version(&net.alice, id, hash).await, 0);
    assert_eq!(app_version(&net.bob, id, hash).await, 1);

    // Any run Alice starts on the app brings her up to date.
    assert!(matches!(
        net.alice.runner.take_action(hash, send(0), 0).await,
        Err(ProtocolError::StaleVersion { .. })
    ));
    net.bob.runner.take_action(hash, send(0), 1).await.unwrap();
    assert_eq!(
        net.agreed_channel(id).await.app(&hash).unwrap().latest_version_number,
        2
    );
}

#[tokio::test(start_paused = true)]
async fn lease_running_out_before_commit_aborts_the_run() {
    let net = Net::new();
    let id = net.setup().await;
    let hash = net.install_app(id).await;
    let before = net.alice.channel(id).await;

    net.alice
        .store
        .set_read_delay(RunnerConfig::default().lock_timeout + Duration::from_secs(1));
    let err = net
        .alice
        .runner
        .take_action(hash, send(1), 0)
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidLockKey(_)), "{:?}", err);
    net.alice.store.set_read_delay(Duration::ZERO);
    assert_eq!(net.alice.channel(id).await, before);

    // Bob did commit, retrying gets Alice there too.
    net.alice.runner.take_action(hash, send(1), 0).await.unwrap();
    assert_eq!(
        net.agreed_channel(id).await.app(&hash).unwrap().latest_version_number,
        1
    );
}

#[tokio::test(start_paused = true)]
async fn countersignature_after_timeout_changes_nothing() {
    let net = Net::new();
    let id = net.setup().await;
    let hash = net.install_app(id).await;
    let before = net.alice.channel(id).await;

    // Bob's two reads take longer than Alice is willing to wait.
    net.bob.store.set_read_delay(Duration::from_secs(3));
    let err = net
        .alice
        .runner
        .take_action(hash, send(1), 0)
        .await
        .unwrap_err();
    assert_eq!(err, ProtocolError::CounterpartyTimeout("bob".into()));

    // The countersignature arrives now and finds no waiting run.
    sleep(Duration::from_secs(5)).await;
    assert_eq!(net.alice.channel(id).await, before);
    net.bob.store.set_read_delay(Duration::ZERO);
    assert_eq!(app_version(&net.bob, id, hash).await, 1);

    net.alice.runner.take_action(hash, send(1), 0).await.unwrap();
    net.agreed_channel(id).await;
}

#[test]
fn invalid_config_is_refused() {
    let bus = InProcessBus::new();
    let config = RunnerConfig {
        lock_timeout: Duration::from_secs(1),
        ..RunnerConfig::default()
    };
    let result = Runner::new(
        "alice",
        Signer::new(&mut StdRng::seed_from_u64(1)),
        Arc::new(MemoryStore::new()),
        ProtoBufEncodingLayer::new(bus),
        Arc::new(registry()),
        config,
    );
    assert!(matches!(result, Err(ConfigError::LockTimeoutTooShort { .. })));
}
