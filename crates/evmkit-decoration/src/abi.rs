//! Compile-time ABI bindings for the contracts the decorators understand.
//!
//! Call selectors and event signature hashes come from `alloy::sol!`, so nothing is
//! parsed from JSON at runtime.

/// Mainnet contract addresses referenced by the decorators.
pub mod addresses {
    use alloy::primitives::{address, Address};

    /// Wrapped Ether; Uniswap paths name it where the user actually pays or receives ETH.
    pub const WETH: Address = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");

    /// Uniswap V2 Router02
    pub const UNISWAP_V2_ROUTER: Address = address!("7a250d5630B4cF539739dF2C5dAcb4c659F2488D");

    /// Uniswap V3 SwapRouter
    pub const UNISWAP_V3_ROUTER: Address = address!("E592427A0AEce92De3Edee1F18E0157C05861564");

    /// 1inch AggregationRouterV5
    pub const ONE_INCH_ROUTER_V5: Address =
        address!("1111111254EEB25477B68fb85Ed929f73A960582");

    /// Placeholder token address 1inch uses for the native coin.
    pub const ONE_INCH_ETH: Address = address!("EeeeeEeeeEeEeeEeEeEeeEEEeeeeEeeeeeeeEEeE");
}

pub mod erc20 {
    use alloy::sol;

    sol! {
        interface IERC20 {
            event Transfer(address indexed from, address indexed to, uint256 value);
            event Approval(address indexed owner, address indexed spender, uint256 value);

            function transfer(address to, uint256 value) external returns (bool);
            function approve(address spender, uint256 value) external returns (bool);
        }
    }
}

pub mod erc721 {
    use alloy::sol;

    // Same name and argument types as the EIP-20 event; only the indexed tokenId
    // (a fourth topic) tells them apart.
    sol! {
        interface IERC721 {
            event Transfer(address indexed from, address indexed to, uint256 indexed tokenId);

            function safeTransferFrom(address from, address to, uint256 tokenId) external;
            function safeTransferFrom(address from, address to, uint256 tokenId, bytes data) external;
        }
    }
}

pub mod erc1155 {
    use alloy::sol;

    sol! {
        interface IERC1155 {
            event TransferSingle(
                address indexed operator,
                address indexed from,
                address indexed to,
                uint256 id,
                uint256 value
            );

            function safeTransferFrom(
                address from,
                address to,
                uint256 id,
                uint256 value,
                bytes data
            ) external;
        }
    }
}

pub mod uniswap_v2 {
    use alloy::sol;

    sol! {
        interface UniswapV2Router02 {
            function swapExactTokensForTokens(
                uint256 amountIn,
                uint256 amountOutMin,
                address[] calldata path,
                address to,
                uint256 deadline
            ) external returns (uint256[] memory amounts);

            function swapTokensForExactTokens(
                uint256 amountOut,
                uint256 amountInMax,
                address[] calldata path,
                address to,
                uint256 deadline
            ) external returns (uint256[] memory amounts);

            function swapExactETHForTokens(
                uint256 amountOutMin,
                address[] calldata path,
                address to,
                uint256 deadline
            ) external payable returns (uint256[] memory amounts);

            function swapETHForExactTokens(
                uint256 amountOut,
                address[] calldata path,
                address to,
                uint256 deadline
            ) external payable returns (uint256[] memory amounts);

            function swapTokensForExactETH(
                uint256 amountOut,
                uint256 amountInMax,
                address[] calldata path,
                address to,
                uint256 deadline
            ) external returns (uint256[] memory amounts);

            function swapExactTokensForETH(
                uint256 amountIn,
                uint256 amountOutMin,
                address[] calldata path,
                address to,
                uint256 deadline
            ) external returns (uint256[] memory amounts);
        }

        interface UniswapV2Pair {
            event Swap(
                address indexed sender,
                uint256 amount0In,
                uint256 amount1In,
                uint256 amount0Out,
                uint256 amount1Out,
                address indexed to
            );
        }
    }
}

pub mod uniswap_v3 {
    use alloy::sol;

    sol! {
        interface SwapRouter {
            struct ExactInputSingleParams {
                address tokenIn;
                address tokenOut;
                uint24 fee;
                address recipient;
                uint256 deadline;
                uint256 amountIn;
                uint256 amountOutMinimum;
                uint160 sqrtPriceLimitX96;
            }

            struct ExactInputParams {
                bytes path;
                address recipient;
                uint256 deadline;
                uint256 amountIn;
                uint256 amountOutMinimum;
            }

            struct ExactOutputSingleParams {
                address tokenIn;
                address tokenOut;
                uint24 fee;
                address recipient;
                uint256 deadline;
                uint256 amountOut;
                uint256 amountInMaximum;
                uint160 sqrtPriceLimitX96;
            }

            struct ExactOutputParams {
                bytes path;
                address recipient;
                uint256 deadline;
                uint256 amountOut;
                uint256 amountInMaximum;
            }

            function exactInputSingle(ExactInputSingleParams calldata params)
                external payable returns (uint256 amountOut);

            function exactInput(ExactInputParams calldata params)
                external payable returns (uint256 amountOut);

            function exactOutputSingle(ExactOutputSingleParams calldata params)
                external payable returns (uint256 amountIn);

            function exactOutput(ExactOutputParams calldata params)
                external payable returns (uint256 amountIn);
        }
    }
}

pub mod one_inch {
    use alloy::sol;

    sol! {
        interface AggregationRouterV5 {
            struct SwapDescription {
                address srcToken;
                address dstToken;
                address srcReceiver;
                address dstReceiver;
                uint256 amount;
                uint256 minReturnAmount;
                uint256 flags;
            }

            function swap(
                address executor,
                SwapDescription calldata desc,
                bytes calldata permit,
                bytes calldata data
            ) external payable returns (uint256 returnAmount, uint256 spentAmount);

            function unoswap(
                address srcToken,
                uint256 amount,
                uint256 minReturn,
                uint256[] calldata pools
            ) external payable returns (uint256 returnAmount);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::sol_types::{SolCall, SolEvent};

    #[test]
    fn addresses_are_valid() {
        assert_eq!(
            addresses::UNISWAP_V2_ROUTER.to_checksum(None),
            "0x7a250d5630B4cF539739dF2C5dAcb4c659F2488D"
        );
        assert_eq!(
            addresses::WETH.to_checksum(None),
            "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"
        );
    }

    #[test]
    fn well_known_selectors() {
        assert_eq!(erc20::IERC20::transferCall::SELECTOR, [0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(erc20::IERC20::approveCall::SELECTOR, [0x09, 0x5e, 0xa7, 0xb3]);
        assert_eq!(
            uniswap_v2::UniswapV2Router02::swapExactTokensForTokensCall::SELECTOR,
            [0x38, 0xed, 0x17, 0x39]
        );
        assert_eq!(
            uniswap_v2::UniswapV2Router02::swapExactETHForTokensCall::SELECTOR,
            [0x7f, 0xf3, 0x6a, 0xb5]
        );
    }

    #[test]
    fn erc20_and_erc721_transfer_share_topic0() {
        assert_eq!(
            erc20::IERC20::Transfer::SIGNATURE_HASH,
            erc721::IERC721::Transfer::SIGNATURE_HASH
        );
    }
}
