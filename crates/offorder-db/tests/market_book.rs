//! Market behaviour against the in-process store: ids, order records and
//! the price-ordered book.

mod common;

use std::collections::HashSet;

use offorder_store::Store;
use offorder_types::{Address, ErrorKind, OffOrderError, Order, OrderId, Side};

#[tokio::test]
async fn initialize_resets_counter_and_raises_flag() {
    let (app, _) = common::app();
    let market = app.market("base", "quote");

    assert!(!market.initialized().await.unwrap());
    market.initialize().await.unwrap();

    assert!(market.initialized().await.unwrap());
    assert_eq!(market.get_order_len().await.unwrap(), 0);
}

#[tokio::test]
async fn counter_starts_at_one_without_initialize() {
    let (app, _) = common::app();
    let market = app.market("base", "quote");

    assert_eq!(market.get_order_len().await.unwrap(), 0);
    assert_eq!(market.incr_order_len().await.unwrap(), OrderId(1));
    assert_eq!(market.incr_order_len().await.unwrap(), OrderId(2));
    assert_eq!(market.get_order_len().await.unwrap(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_incrementers_get_gapless_unique_ids() {
    const TASKS: i64 = 8;
    const PER_TASK: i64 = 50;

    let (app, _) = common::app();
    let market = app.market("base", "quote");
    market.initialize().await.unwrap();

    let handles: Vec<_> = (0..TASKS)
        .map(|_| {
            let market = market.clone();
            tokio::spawn(async move {
                let mut ids = Vec::new();
                for _ in 0..PER_TASK {
                    ids.push(market.incr_order_len().await.unwrap().as_i64());
                }
                ids
            })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        ids.extend(handle.await.unwrap());
    }
    ids.sort_unstable();

    let expected: Vec<i64> = (1..=TASKS * PER_TASK).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn markets_do_not_share_counters() {
    let (app, _) = common::app();
    let a = app.market("base", "quote");
    let b = app.market("quote", "base");

    a.incr_order_len().await.unwrap();
    a.incr_order_len().await.unwrap();

    assert_eq!(b.incr_order_len().await.unwrap(), OrderId(1));
}

#[tokio::test]
async fn set_then_get_returns_equal_order() {
    let (app, _) = common::app();
    let market = app.market("base", "quote");

    for _ in 0..20 {
        let id = market.incr_order_len().await.unwrap();
        let order = Order::random("addr", "base", "quote");
        market.set_order(id, Side::Bid, &order).await.unwrap();
        assert_eq!(market.get_order(id).await.unwrap(), order);
    }
}

#[tokio::test]
async fn stored_record_uses_wire_encoding() {
    let (app, store) = common::app();
    let market = app.market("base", "quote");
    let order = Order::dummy("addr", "base", "quote", 5, 10);

    market.set_order(OrderId(1), Side::Bid, &order).await.unwrap();

    let raw = store
        .get(&market.order_key(OrderId(1)))
        .await
        .unwrap()
        .unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["data"]["address"], "YWRkcg==");
    assert_eq!(json["data"]["amount"], 5);
    assert_eq!(json["data"]["price"], 10);
    assert_eq!(json["taken"], 0);
    assert_eq!(
        store
            .zscore(&market.orderbook_key(Side::Bid), "1")
            .await
            .unwrap(),
        Some(10.0)
    );
}

#[tokio::test]
async fn missing_order_is_not_found() {
    let (app, _) = common::app();
    let market = app.market("base", "quote");

    let err = market.get_order(OrderId(42)).await.unwrap_err();

    assert!(matches!(err, OffOrderError::OrderNotFound { id: OrderId(42), .. }));
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn duplicate_index_entry_is_rejected_and_record_discarded() {
    let (app, _) = common::app();
    let market = app.market("base", "quote");
    let first = Order::dummy("addr", "base", "quote", 1, 10);
    let second = Order::dummy("addr", "base", "quote", 2, 20);

    market.set_order(OrderId(1), Side::Ask, &first).await.unwrap();
    let err = market
        .set_order(OrderId(1), Side::Ask, &second)
        .await
        .unwrap_err();

    assert!(matches!(err, OffOrderError::DuplicateOrder { id: OrderId(1), side: Side::Ask }));
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(!market.has_order(OrderId(1)).await.unwrap());
    assert_eq!(market.orderbook_len(Side::Ask).await.unwrap(), 1);
}

#[tokio::test]
async fn same_id_may_sit_on_both_sides() {
    let (app, _) = common::app();
    let market = app.market("base", "quote");
    let order = Order::dummy("addr", "base", "quote", 1, 10);

    market.set_order(OrderId(1), Side::Bid, &order).await.unwrap();
    market.set_order(OrderId(1), Side::Ask, &order).await.unwrap();

    assert_eq!(market.orderbook_len(Side::Bid).await.unwrap(), 1);
    assert_eq!(market.orderbook_len(Side::Ask).await.unwrap(), 1);
}

#[tokio::test]
async fn del_order_twice() {
    let (app, _) = common::app();
    let market = app.market("base", "quote");
    let order = Order::dummy("addr", "base", "quote", 1, 10);
    market.set_order(OrderId(7), Side::Bid, &order).await.unwrap();

    assert!(market.has_order(OrderId(7)).await.unwrap());
    assert!(market.del_order(OrderId(7)).await.unwrap());
    assert!(!market.has_order(OrderId(7)).await.unwrap());
    assert!(!market.del_order(OrderId(7)).await.unwrap());
}

#[tokio::test]
async fn del_order_leaves_stale_index_entry() {
    let (app, _) = common::app();
    let market = app.market("base", "quote");
    let order = Order::dummy("addr", "base", "quote", 1, 10);
    market.set_order(OrderId(1), Side::Bid, &order).await.unwrap();

    market.del_order(OrderId(1)).await.unwrap();

    assert_eq!(market.orderbook_len(Side::Bid).await.unwrap(), 1);
    let err = market.get_orderbook(Side::Bid, 0).await.unwrap_err();
    assert!(matches!(err, OffOrderError::OrderNotFound { .. }));
}

#[tokio::test]
async fn cancel_order_removes_record_and_index_entry() {
    let (app, _) = common::app();
    let market = app.market("base", "quote");
    for (id, price) in [(1, 10), (2, 20)] {
        let order = Order::dummy("addr", "base", "quote", 1, price);
        market.set_order(OrderId(id), Side::Bid, &order).await.unwrap();
    }

    assert!(market.cancel_order(OrderId(1), Side::Bid).await.unwrap());
    assert!(!market.cancel_order(OrderId(1), Side::Bid).await.unwrap());

    let book = market.get_orderbook(Side::Bid, 0).await.unwrap();
    assert_eq!(book.len(), 1);
    assert_eq!(book[0].price(), 20);
}

#[tokio::test]
async fn bid_book_is_ascending_by_price() {
    let (app, _) = common::app();
    let market = app.market("base", "quote");
    market.initialize().await.unwrap();

    for price in [30, 10, 50, 20, 40] {
        let id = market.incr_order_len().await.unwrap();
        let order = Order::dummy("addr", "base", "quote", 1, price);
        market.set_order(id, Side::Bid, &order).await.unwrap();
    }

    let prices: Vec<i64> = market
        .get_orderbook(Side::Bid, 0)
        .await
        .unwrap()
        .iter()
        .map(Order::price)
        .collect();
    assert_eq!(prices, vec![10, 20, 30, 40, 50]);
}

#[tokio::test]
async fn ask_book_is_descending_by_price() {
    let (app, _) = common::app();
    let market = app.market("base", "quote");

    for price in [30, 10, 50, 20, 40] {
        let id = market.incr_order_len().await.unwrap();
        let order = Order::dummy("addr", "base", "quote", 1, price);
        market.set_order(id, Side::Ask, &order).await.unwrap();
    }

    let prices: Vec<i64> = market
        .get_orderbook(Side::Ask, 0)
        .await
        .unwrap()
        .iter()
        .map(Order::price)
        .collect();
    assert_eq!(prices, vec![50, 40, 30, 20, 10]);
}

#[tokio::test]
async fn random_books_are_sorted() {
    let (app, _) = common::app();
    let market = app.market("base", "quote");

    for side in [Side::Bid, Side::Ask] {
        for _ in 0..50 {
            let id = market.incr_order_len().await.unwrap();
            let order = Order::random("addr", "base", "quote");
            market.set_order(id, side, &order).await.unwrap();
        }
    }

    let bids = market.get_orderbook(Side::Bid, 0).await.unwrap();
    let asks = market.get_orderbook(Side::Ask, 0).await.unwrap();
    assert_eq!(bids.len(), 50);
    assert_eq!(asks.len(), 50);
    assert!(bids.windows(2).all(|w| w[0].price() <= w[1].price()));
    assert!(asks.windows(2).all(|w| w[0].price() >= w[1].price()));
}

#[tokio::test]
async fn depth_skips_leading_ranks() {
    let (app, _) = common::app();
    let market = app.market("base", "quote");
    for (id, price) in [(1, 30), (2, 10), (3, 20)] {
        let order = Order::dummy("addr", "base", "quote", 1, price);
        market.set_order(OrderId(id), Side::Bid, &order).await.unwrap();
    }

    let prices: Vec<i64> = market
        .get_orderbook(Side::Bid, 1)
        .await
        .unwrap()
        .iter()
        .map(Order::price)
        .collect();
    assert_eq!(prices, vec![20, 30]);
    assert!(market.get_orderbook(Side::Bid, 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_book_is_empty() {
    let (app, _) = common::app();
    let market = app.market("base", "quote");

    assert!(market.get_orderbook(Side::Ask, 0).await.unwrap().is_empty());
    assert_eq!(market.orderbook_len(Side::Ask).await.unwrap(), 0);
}

#[tokio::test]
async fn malformed_index_member_fails_the_read() {
    let (app, store) = common::app();
    let market = app.market("base", "quote");
    store
        .zadd(&market.orderbook_key(Side::Bid), 1.0, "not-an-id")
        .await
        .unwrap();

    let err = market.get_orderbook(Side::Bid, 0).await.unwrap_err();
    assert!(matches!(err, OffOrderError::MalformedMember(ref m) if m == "not-an-id"));
}

#[tokio::test]
async fn corrupt_counter_is_reported() {
    let (app, store) = common::app();
    let market = app.market("base", "quote");
    store
        .set(&market.order_len_key(), "garbage", None)
        .await
        .unwrap();

    let err = market.get_order_len().await.unwrap_err();
    assert!(matches!(err, OffOrderError::CorruptCounter { .. }));
}

#[tokio::test]
async fn nonces_count_per_address() {
    let (app, _) = common::app();
    let market = app.market("base", "quote");
    let alice = Address::from("alice");
    let bob = Address::from("bob");

    assert_eq!(market.get_nonce(&alice).await.unwrap(), 0);
    assert_eq!(market.incr_nonce(&alice).await.unwrap(), 1);
    assert_eq!(market.incr_nonce(&alice).await.unwrap(), 2);
    assert_eq!(market.get_nonce(&alice).await.unwrap(), 2);
    assert_eq!(market.get_nonce(&bob).await.unwrap(), 0);
}

#[tokio::test]
async fn namespaces_are_isolated() {
    let (app, store) = common::app();
    let other = offorder_db::App::new(store.clone(), "other-api");
    let order = Order::dummy("addr", "base", "quote", 1, 10);

    app.market("base", "quote")
        .set_order(OrderId(1), Side::Bid, &order)
        .await
        .unwrap();

    assert!(!other.market("base", "quote").has_order(OrderId(1)).await.unwrap());
    let keys: HashSet<_> = [
        app.market("base", "quote").order_key(OrderId(1)),
        other.market("base", "quote").order_key(OrderId(1)),
    ]
    .into_iter()
    .collect();
    assert_eq!(keys.len(), 2);
}
