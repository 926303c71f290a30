/// Stock ledger behaviour against PostgreSQL

mod common;

use marketwindow_shared::{
    ledger::{self, BulkItem, LedgerError, StockChange},
    models::{
        product::{CreateProduct, Product},
        shop::Shop,
        user::User,
    },
};
use sqlx::PgPool;
use uuid::Uuid;

async fn product_with_stock(pool: &PgPool, quantity: i64) -> (User, Shop, Product) {
    let (seller, shop) = common::create_shop(pool).await;
    let product = ledger::create_product(
        pool,
        shop.id,
        CreateProduct {
            name: "Plantain".to_string(),
            product_type: None,
            description: None,
            tags: vec!["fresh".to_string()],
            price_cents: 300,
            category_id: None,
        },
        quantity,
        seller.id,
    )
    .await
    .unwrap();

    (seller, shop, product)
}

#[tokio::test]
async fn test_opening_stock_is_a_ledger_entry() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let (_, _, product) = product_with_stock(&pool, 12).await;
    assert_eq!(product.quantity, 12);

    let history = ledger::history(&pool, product.id, None, None).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].delta, 12);
    assert_eq!(history[0].resulting_quantity, 12);
    assert!(history[0].reverses_id.is_none());
}

#[tokio::test]
async fn test_zero_opening_stock_writes_no_entry() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let (_, _, product) = product_with_stock(&pool, 0).await;

    let history = ledger::history(&pool, product.id, None, None).await.unwrap();
    assert!(history.is_empty());
}

#[tokio::test]
async fn test_apply_delta_and_set_to() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let (seller, shop, product) = product_with_stock(&pool, 10).await;

    let applied = ledger::apply(&pool, product.id, StockChange::Delta(5), seller.id, Some("delivery"), Some(shop.id))
        .await
        .unwrap();
    assert_eq!(applied.update.delta, 5);
    assert_eq!(applied.update.reason, "delivery");
    assert_eq!(applied.product.quantity, 15);

    let applied = ledger::apply(&pool, product.id, StockChange::SetTo(4), seller.id, None, Some(shop.id))
        .await
        .unwrap();
    assert_eq!(applied.update.delta, -11);
    assert_eq!(applied.update.resulting_quantity, 4);
    assert!(!applied.update.reason.is_empty());

    let reconciliation = ledger::reconcile(&pool, product.id).await.unwrap();
    assert!(reconciliation.consistent);
    assert_eq!(reconciliation.ledger_sum, 4);
}

#[tokio::test]
async fn test_no_op_change_is_rejected() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let (seller, _, product) = product_with_stock(&pool, 7).await;

    let result = ledger::apply(&pool, product.id, StockChange::SetTo(7), seller.id, None, None).await;
    assert!(matches!(result, Err(LedgerError::NoChange)));

    let result = ledger::apply(&pool, product.id, StockChange::SetTo(-1), seller.id, None, None).await;
    assert!(matches!(result, Err(LedgerError::InvalidQuantity(_))));

    let history = ledger::history(&pool, product.id, None, None).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_removal_stops_at_zero() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let (seller, _, product) = product_with_stock(&pool, 3).await;

    let applied = ledger::apply(&pool, product.id, StockChange::Delta(-10), seller.id, None, None)
        .await
        .unwrap();
    assert_eq!(applied.update.delta, -3);
    assert_eq!(applied.product.quantity, 0);

    let result = ledger::apply(&pool, product.id, StockChange::Delta(-1), seller.id, None, None).await;
    assert!(matches!(result, Err(LedgerError::NoChange)));
}

#[tokio::test]
async fn test_other_shops_products_are_not_found() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let (_, _, product) = product_with_stock(&pool, 3).await;
    let (intruder, other_shop) = common::create_shop(&pool).await;

    let result = ledger::apply(
        &pool,
        product.id,
        StockChange::Delta(1),
        intruder.id,
        None,
        Some(other_shop.id),
    )
    .await;
    assert!(matches!(result, Err(LedgerError::ProductNotFound)));

    let result = ledger::apply(&pool, Uuid::new_v4(), StockChange::Delta(1), intruder.id, None, None).await;
    assert!(matches!(result, Err(LedgerError::ProductNotFound)));
}

#[tokio::test]
async fn test_undo_appends_inverse_entry_once() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let (seller, shop, product) = product_with_stock(&pool, 10).await;

    let sale = ledger::apply(&pool, product.id, StockChange::Delta(-3), seller.id, Some("sold"), Some(shop.id))
        .await
        .unwrap();

    let undone = ledger::undo(&pool, sale.update.id, seller.id, None, Some(shop.id))
        .await
        .unwrap();
    assert_eq!(undone.update.delta, 3);
    assert_eq!(undone.update.reverses_id, Some(sale.update.id));
    assert_eq!(undone.update.reason, "undo: sold");
    assert_eq!(undone.product.quantity, 10);

    let again = ledger::undo(&pool, sale.update.id, seller.id, None, Some(shop.id)).await;
    assert!(matches!(again, Err(LedgerError::AlreadyReversed)));

    let undo_of_undo = ledger::undo(&pool, undone.update.id, seller.id, None, Some(shop.id)).await;
    assert!(matches!(undo_of_undo, Err(LedgerError::CannotUndoReversal)));

    // The original entry is untouched
    let history = ledger::history(&pool, product.id, None, None).await.unwrap();
    assert_eq!(history.len(), 3);
    let original = history.iter().find(|e| e.id == sale.update.id).unwrap();
    assert_eq!(original.delta, -3);
    assert_eq!(original.reason, "sold");
}

#[tokio::test]
async fn test_undo_cannot_drive_stock_negative() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let (seller, _, product) = product_with_stock(&pool, 5).await;
    let opening = ledger::history(&pool, product.id, None, None).await.unwrap()[0].clone();

    ledger::apply(&pool, product.id, StockChange::SetTo(0), seller.id, None, None)
        .await
        .unwrap();

    let result = ledger::undo(&pool, opening.id, seller.id, None, None).await;
    assert!(matches!(
        result,
        Err(LedgerError::InsufficientStock { available: 0, required: 5 })
    ));
}

#[tokio::test]
async fn test_undo_is_scoped_to_shop() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let (_, _, product) = product_with_stock(&pool, 5).await;
    let (intruder, other_shop) = common::create_shop(&pool).await;
    let opening = ledger::history(&pool, product.id, None, None).await.unwrap()[0].clone();

    let result = ledger::undo(&pool, opening.id, intruder.id, None, Some(other_shop.id)).await;
    assert!(matches!(result, Err(LedgerError::EntryNotFound)));
}

#[tokio::test]
async fn test_bulk_items_commit_independently() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let (seller, shop, product) = product_with_stock(&pool, 2).await;

    let items = vec![
        BulkItem {
            product_id: product.id,
            change: StockChange::Delta(8),
            reason: None,
        },
        BulkItem {
            product_id: Uuid::new_v4(),
            change: StockChange::Delta(1),
            reason: None,
        },
        BulkItem {
            product_id: product.id,
            change: StockChange::SetTo(10),
            reason: None,
        },
    ];

    let results = ledger::apply_bulk(&pool, &items, seller.id, Some(shop.id)).await;
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().product.quantity, 10);
    assert!(matches!(results[1], Err(LedgerError::ProductNotFound)));
    assert!(matches!(results[2], Err(LedgerError::NoChange)));

    let product = Product::find_by_id(&pool, product.id).await.unwrap().unwrap();
    assert_eq!(product.quantity, 10);
}

#[tokio::test]
async fn test_concurrent_updates_keep_projection_consistent() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let (seller, _, product) = product_with_stock(&pool, 20).await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let pool = pool.clone();
        let change = if i % 2 == 0 {
            StockChange::Delta(-2)
        } else {
            StockChange::Delta(1)
        };
        handles.push(tokio::spawn(async move {
            ledger::apply(&pool, product.id, change, seller.id, None, None).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let reconciliation = ledger::reconcile(&pool, product.id).await.unwrap();
    assert!(reconciliation.consistent);
    assert_eq!(reconciliation.quantity, 20 - 8 + 4);

    // Every entry's resulting quantity follows from the one before it
    let mut history = ledger::history(&pool, product.id, None, None).await.unwrap();
    history.reverse();
    let mut running = 0;
    for entry in history {
        running += entry.delta;
        assert_eq!(entry.resulting_quantity, running);
    }
}
