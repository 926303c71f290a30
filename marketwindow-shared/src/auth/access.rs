/// Role-scoped access gate
///
/// Every mutating operation names the roles allowed to perform it and whether
/// the caller must own the shop it touches. [`authorize`] checks both and
/// fails closed: an unknown combination, a missing owner for an owner-scoped
/// operation, or an owner mismatch is always `Forbidden`.
///
/// Route prefixes carry a coarse role gate
/// ([`create_role_gate`](super::middleware::create_role_gate)); handlers call
/// [`authorize`] for the operation they perform.
///
/// # Example
///
/// ```
/// use marketwindow_shared::auth::access::{authorize, AccessError, Operation};
/// use marketwindow_shared::auth::middleware::AuthContext;
/// use marketwindow_shared::models::user::UserRole;
/// use uuid::Uuid;
///
/// let seller = AuthContext::new(Uuid::new_v4(), UserRole::Seller);
///
/// // Owner may update stock in their own shop
/// assert!(authorize(&seller, Operation::UpdateStock, Some(seller.user_id)).is_ok());
///
/// // ...but not in someone else's
/// assert!(matches!(
///     authorize(&seller, Operation::UpdateStock, Some(Uuid::new_v4())),
///     Err(AccessError::Forbidden { .. })
/// ));
///
/// // ...and never an admin operation
/// assert!(authorize(&seller, Operation::SendVerificationCode, None).is_err());
/// ```

use uuid::Uuid;

use super::middleware::AuthContext;
use crate::models::user::UserRole;

/// Error type for access checks
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AccessError {
    #[error("Forbidden: {operation} is not permitted")]
    Forbidden { operation: &'static str },
}

/// Who may perform an operation, beyond the role check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Role alone decides
    None,

    /// Caller must own the shop the operation touches
    ShopOwner,
}

/// Operations guarded by the access gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    // Seller
    CreateShop,
    UpdateShop,
    ResubmitVerification,
    ConfirmVerification,
    ManageProducts,
    UpdateStock,
    UndoStock,
    ViewInventory,
    ViewFollowers,

    // Admin
    ReviewShops,
    SendVerificationCode,
    RejectVerification,
    AnnotateVerification,
    ModerateShop,
    ManageCategories,
    AuditStock,
    ManageUsers,

    // Buyer
    FollowShop,
    ViewFollowing,
}

const ADMIN: &[UserRole] = &[UserRole::Admin];
const SELLER: &[UserRole] = &[UserRole::Seller];
const BUYER: &[UserRole] = &[UserRole::Buyer];

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::CreateShop => "create_shop",
            Operation::UpdateShop => "update_shop",
            Operation::ResubmitVerification => "resubmit_verification",
            Operation::ConfirmVerification => "confirm_verification",
            Operation::ManageProducts => "manage_products",
            Operation::UpdateStock => "update_stock",
            Operation::UndoStock => "undo_stock",
            Operation::ViewInventory => "view_inventory",
            Operation::ViewFollowers => "view_followers",
            Operation::ReviewShops => "review_shops",
            Operation::SendVerificationCode => "send_verification_code",
            Operation::RejectVerification => "reject_verification",
            Operation::AnnotateVerification => "annotate_verification",
            Operation::ModerateShop => "moderate_shop",
            Operation::ManageCategories => "manage_categories",
            Operation::AuditStock => "audit_stock",
            Operation::ManageUsers => "manage_users",
            Operation::FollowShop => "follow_shop",
            Operation::ViewFollowing => "view_following",
        }
    }

    /// Roles allowed to perform the operation
    pub fn allowed_roles(&self) -> &'static [UserRole] {
        match self {
            Operation::CreateShop
            | Operation::UpdateShop
            | Operation::ResubmitVerification
            | Operation::ConfirmVerification
            | Operation::ManageProducts
            | Operation::UpdateStock
            | Operation::UndoStock
            | Operation::ViewInventory
            | Operation::ViewFollowers => SELLER,

            Operation::ReviewShops
            | Operation::SendVerificationCode
            | Operation::RejectVerification
            | Operation::AnnotateVerification
            | Operation::ModerateShop
            | Operation::ManageCategories
            | Operation::AuditStock
            | Operation::ManageUsers => ADMIN,

            Operation::FollowShop | Operation::ViewFollowing => BUYER,
        }
    }

    pub fn ownership(&self) -> Ownership {
        match self {
            Operation::UpdateShop
            | Operation::ResubmitVerification
            | Operation::ConfirmVerification
            | Operation::ManageProducts
            | Operation::UpdateStock
            | Operation::UndoStock
            | Operation::ViewInventory
            | Operation::ViewFollowers => Ownership::ShopOwner,
            _ => Ownership::None,
        }
    }
}

/// Checks role and ownership for an operation
///
/// `shop_owner` is the owner of the shop being touched; it is ignored for
/// operations without an ownership predicate and required for the others.
pub fn authorize(
    auth: &AuthContext,
    operation: Operation,
    shop_owner: Option<Uuid>,
) -> Result<(), AccessError> {
    let forbidden = AccessError::Forbidden {
        operation: operation.name(),
    };

    if !operation.allowed_roles().contains(&auth.role) {
        tracing::warn!(user_id = %auth.user_id, role = %auth.role, operation = operation.name(), "Role not permitted");
        return Err(forbidden);
    }

    match (operation.ownership(), shop_owner) {
        (Ownership::None, _) => Ok(()),
        (Ownership::ShopOwner, Some(owner)) if owner == auth.user_id => Ok(()),
        (Ownership::ShopOwner, _) => {
            tracing::warn!(user_id = %auth.user_id, operation = operation.name(), "Ownership check failed");
            Err(forbidden)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Operation; 19] = [
        Operation::CreateShop,
        Operation::UpdateShop,
        Operation::ResubmitVerification,
        Operation::ConfirmVerification,
        Operation::ManageProducts,
        Operation::UpdateStock,
        Operation::UndoStock,
        Operation::ViewInventory,
        Operation::ViewFollowers,
        Operation::ReviewShops,
        Operation::SendVerificationCode,
        Operation::RejectVerification,
        Operation::AnnotateVerification,
        Operation::ModerateShop,
        Operation::ManageCategories,
        Operation::AuditStock,
        Operation::ManageUsers,
        Operation::FollowShop,
        Operation::ViewFollowing,
    ];

    fn ctx(role: UserRole) -> AuthContext {
        AuthContext::new(Uuid::new_v4(), role)
    }

    #[test]
    fn test_every_operation_has_exactly_one_role() {
        for op in ALL {
            assert_eq!(op.allowed_roles().len(), 1, "{}", op.name());
        }
    }

    #[test]
    fn test_roles_outside_capability_set_are_forbidden() {
        for op in ALL {
            for role in [UserRole::Admin, UserRole::Seller, UserRole::Buyer] {
                let auth = ctx(role);
                let result = authorize(&auth, op, Some(auth.user_id));
                assert_eq!(
                    result.is_ok(),
                    op.allowed_roles().contains(&role),
                    "{} as {}",
                    op.name(),
                    role
                );
            }
        }
    }

    #[test]
    fn test_owner_scoped_operations_fail_closed_without_owner() {
        let seller = ctx(UserRole::Seller);
        for op in ALL.into_iter().filter(|op| op.ownership() == Ownership::ShopOwner) {
            assert!(authorize(&seller, op, None).is_err(), "{}", op.name());
            assert!(authorize(&seller, op, Some(Uuid::new_v4())).is_err(), "{}", op.name());
            assert!(authorize(&seller, op, Some(seller.user_id)).is_ok(), "{}", op.name());
        }
    }

    #[test]
    fn test_admin_cannot_mutate_seller_stock() {
        let admin = ctx(UserRole::Admin);
        assert_eq!(
            authorize(&admin, Operation::UpdateStock, Some(admin.user_id)),
            Err(AccessError::Forbidden { operation: "update_stock" })
        );
    }

    #[test]
    fn test_create_shop_needs_no_owner() {
        assert!(authorize(&ctx(UserRole::Seller), Operation::CreateShop, None).is_ok());
        assert!(authorize(&ctx(UserRole::Buyer), Operation::CreateShop, None).is_err());
    }
}
