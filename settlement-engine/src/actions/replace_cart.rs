//! ReplaceCart command handler
//!
//! Replaces the user's open cart wholesale: previous reservations are
//! released, the new lines are validated and reserved all-or-nothing,
//! and the per-shop shipping surcharges are recomputed.

use async_trait::async_trait;

use crate::inventory;
use crate::money::{validate_cart_line, validate_price};
use crate::shipping;
use crate::traits::{CommandContext, CommandHandler, CommandMetadata, EngineError};
use shared::models::{Cart, CartLine};
use shared::settlement::{
    CartLineInput, EventPayload, SettlementEvent, SettlementEventType,
};

/// ReplaceCart action
#[derive(Debug, Clone)]
pub struct ReplaceCartAction {
    pub user_id: String,
    pub lines: Vec<CartLineInput>,
}

impl ReplaceCartAction {
    /// Resolve one input line against the catalog
    fn resolve_line(
        &self,
        ctx: &mut CommandContext<'_>,
        input: &CartLineInput,
    ) -> Result<CartLine, EngineError> {
        let product = ctx.load_product(&input.product_id)?;
        if !product.is_active {
            return Err(EngineError::Validation(format!(
                "product {} is not active",
                product.id
            )));
        }

        let (unit_price, product_name) = match &input.variant_id {
            Some(variant_id) => {
                let variant = ctx.load_variant(variant_id)?;
                if variant.product_id != product.id {
                    return Err(EngineError::Validation(format!(
                        "variant {} does not belong to product {}",
                        variant.id, product.id
                    )));
                }
                (variant.price, format!("{} - {}", product.name, variant.name))
            }
            None => {
                if product.has_variants {
                    return Err(EngineError::Validation(format!(
                        "product {} requires a variant",
                        product.id
                    )));
                }
                (product.price, product.name.clone())
            }
        };
        validate_price(unit_price, &product_name)?;

        Ok(CartLine {
            product_id: product.id,
            variant_id: input.variant_id.clone(),
            shop_id: product.shop_id,
            product_name,
            quantity: input.quantity,
            unit_price,
            weight_grams: product.weight_grams,
        })
    }
}

#[async_trait]
impl CommandHandler for ReplaceCartAction {
    async fn execute(
        &self,
        ctx: &mut CommandContext<'_>,
        metadata: &CommandMetadata,
    ) -> Result<Vec<SettlementEvent>, EngineError> {
        // 1. Validate input lines
        if self.lines.is_empty() {
            return Err(EngineError::Validation("cart has no lines".to_string()));
        }
        for line in &self.lines {
            validate_cart_line(line)?;
        }

        // 2. Release the previous open cart's reservations (replace
        //    semantics, not additive)
        let previous = ctx.find_open_cart(&self.user_id)?;
        if let Some(ref cart) = previous {
            inventory::release_lines(ctx, &cart.lines)?;
        }

        // 3. Resolve lines against the catalog and reserve stock
        let mut lines = Vec::with_capacity(self.lines.len());
        for input in &self.lines {
            lines.push(self.resolve_line(ctx, input)?);
        }
        inventory::reserve_lines(ctx, &lines)?;

        // 4. Per-shop shipping surcharges from the rate table
        let rate_table = ctx.rate_table()?;
        let (shop_shipping, additional_shipping_cost) =
            shipping::shipping_by_shop(&lines, &rate_table);

        // 5. Persist the cart, reusing the open cart's identity
        let cart_id = match previous {
            Some(cart) => cart.id,
            None => uuid::Uuid::new_v4().to_string(),
        };
        let line_count = lines.len();
        let cart = Cart {
            id: cart_id.clone(),
            user_id: self.user_id.clone(),
            lines,
            shop_shipping,
            additional_shipping_cost,
            order_id: None,
            created_at: metadata.timestamp,
            updated_at: metadata.timestamp,
        };
        ctx.save_cart(cart);

        // 6. Emit event
        let seq = ctx.next_sequence();
        let event = SettlementEvent::new(
            seq,
            cart_id.clone(),
            metadata.operator_id.clone(),
            metadata.operator_name.clone(),
            metadata.command_id.clone(),
            metadata.timestamp,
            SettlementEventType::CartReplaced,
            EventPayload::CartReplaced {
                user_id: self.user_id.clone(),
                cart_id,
                line_count,
                additional_shipping_cost,
            },
        );

        Ok(vec![event])
    }
}
